//! The bus contract shared by every adapter.
//!
//! A *queue* is a durable, append-only log of messages. A *group* is a
//! durable consumer cursor on a queue: consumers that share a group compete
//! for messages, while every distinct group receives every message. A
//! message stays on its queue until every group declared on it has settled
//! it, so [`MessageBus::inspect_depth`] counts work that is not yet done.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BusError;

/// Shared handle to a bus adapter.
pub type SharedBus = Arc<dyn MessageBus>;

/// A durable queue message bus with at-least-once delivery and manual
/// acknowledgment.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Declare a durable queue. Idempotent.
    async fn declare_queue(&self, queue: &str) -> Result<(), BusError>;

    /// Declare a durable consumer group on `queue`. Idempotent.
    ///
    /// A freshly created group only receives messages published after it
    /// was declared.
    async fn declare_group(&self, queue: &str, group: &str) -> Result<(), BusError>;

    /// Remove a consumer group. Messages no longer wait for it.
    async fn remove_group(&self, queue: &str, group: &str) -> Result<(), BusError>;

    /// Publish a persistent message.
    ///
    /// Returns once the broker has stored the message.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Open a subscription on `group` that holds at most `prefetch`
    /// unsettled deliveries at a time.
    async fn consume(
        &self,
        queue: &str,
        group: &str,
        prefetch: usize,
    ) -> Result<Box<dyn Subscription>, BusError>;

    /// Number of messages on `queue` not yet settled by every group.
    async fn inspect_depth(&self, queue: &str) -> Result<u64, BusError>;

    /// Drop every message on `queue`. Returns the number dropped.
    async fn purge(&self, queue: &str) -> Result<u64, BusError>;
}

/// A lazy, infinite stream of deliveries from one consumer group.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Blocks while the prefetch window is full or the group has nothing
    /// pending. Dropping the returned future loses nothing.
    async fn next(&mut self) -> Result<Box<dyn Delivery>, BusError>;
}

/// One message handed to a consumer, awaiting settlement.
///
/// Dropping a delivery without settling it puts the message back on the
/// queue for redelivery.
#[async_trait]
pub trait Delivery: Send {
    /// Message body.
    fn payload(&self) -> &[u8];

    /// How many times this message has been handed out, this one included.
    fn delivery_count(&self) -> u64;

    /// Whether this message was handed out before.
    fn redelivered(&self) -> bool {
        self.delivery_count() > 1
    }

    /// Settle the message as processed.
    async fn ack(self: Box<Self>) -> Result<(), BusError>;

    /// Reject the message. With `requeue` it is delivered again, otherwise
    /// it is dropped for this group.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BusError>;
}
