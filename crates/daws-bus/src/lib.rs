//! Durable message bus adapter for the DAWS tick protocol.
//!
//! Every component of the simulation coordinates exclusively through the
//! bus: the coordinator broadcasts tick starts, domain controllers fan out
//! jobs, workers report outcomes, and controllers report readiness. This
//! crate defines the contract ([`MessageBus`], [`Subscription`],
//! [`Delivery`]) and two adapters:
//!
//! - [`JetStreamBus`] -- NATS `JetStream` with file storage and interest
//!   retention, for deployments
//! - [`MemoryBus`] -- in-process, same semantics, for tests and demos
//!
//! [`topology`] names the queues and groups, [`codec`] handles JSON bodies,
//! and [`RetryPolicy`] bounds reconnect and publish retries.

pub mod bus;
pub mod codec;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod retry;
pub mod topology;

pub use bus::{Delivery, MessageBus, SharedBus, Subscription};
pub use codec::{decode, encode, publish_json};
pub use error::BusError;
pub use jetstream::{JetStreamBus, JetStreamOptions};
pub use memory::{BusEvent, MemoryBus};
pub use retry::RetryPolicy;
