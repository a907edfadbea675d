//! NATS `JetStream` adapter.
//!
//! Each queue is a `JetStream` stream of the same name with a single subject,
//! file storage and interest retention: a message is removed once every
//! durable consumer on the stream has acknowledged it. Each group is a
//! durable pull consumer with explicit acks. Requeue maps to `Nak`, and a
//! nack without requeue maps to `Term`.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer, stream};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::bus::{Delivery, MessageBus, Subscription};
use crate::error::BusError;
use crate::retry::RetryPolicy;

/// Tunables for the `JetStream` adapter.
#[derive(Debug, Clone)]
pub struct JetStreamOptions {
    /// How long to wait for the broker to store a published message.
    pub publish_timeout: Duration,
    /// How long a delivery may stay unsettled before the broker resends it.
    pub ack_wait: Duration,
    /// Broker-side cap on deliveries of one message to one group.
    pub max_deliver: i64,
    /// Idle time after which the broker deletes a durable group.
    pub inactive_threshold: Duration,
    /// Expiry of each pull request a subscription keeps open.
    pub fetch_expiry: Duration,
}

impl Default for JetStreamOptions {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(5),
            ack_wait: Duration::from_secs(30),
            max_deliver: 5,
            inactive_threshold: Duration::from_secs(300),
            fetch_expiry: Duration::from_secs(1),
        }
    }
}

/// [`MessageBus`] backed by NATS `JetStream`.
pub struct JetStreamBus {
    client: async_nats::Client,
    context: jetstream::Context,
    options: JetStreamOptions,
}

impl JetStreamBus {
    /// Connect to a NATS server, retrying with bounded backoff.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unavailable`] once `retry` is exhausted.
    pub async fn connect(
        url: &str,
        retry: &RetryPolicy,
        options: JetStreamOptions,
    ) -> Result<Self, BusError> {
        info!(url = url, "connecting to NATS server");
        let client = retry
            .run("nats connect", move || async move {
                async_nats::connect(url)
                    .await
                    .map_err(|e| BusError::Unavailable(format!("failed to connect to {url}: {e}")))
            })
            .await?;
        info!("NATS connection established");
        let context = jetstream::new(client.clone());
        Ok(Self {
            client,
            context,
            options,
        })
    }

    /// Flush pending publishes to the server.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unavailable`] if the flush fails.
    pub async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Unavailable(format!("flush failed: {e}")))
    }

    async fn stream(&self, queue: &str) -> Result<stream::Stream, BusError> {
        self.context.get_stream(queue).await.map_err(|e| {
            BusError::Unavailable(format!("failed to look up stream {queue}: {e}"))
        })
    }

    fn group_config(&self, group: &str) -> consumer::pull::Config {
        consumer::pull::Config {
            durable_name: Some(group.to_owned()),
            ack_policy: consumer::AckPolicy::Explicit,
            deliver_policy: consumer::DeliverPolicy::New,
            ack_wait: self.options.ack_wait,
            max_deliver: self.options.max_deliver,
            inactive_threshold: self.options.inactive_threshold,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MessageBus for JetStreamBus {
    async fn declare_queue(&self, queue: &str) -> Result<(), BusError> {
        self.context
            .get_or_create_stream(stream::Config {
                name: queue.to_owned(),
                subjects: vec![queue.to_owned()],
                retention: stream::RetentionPolicy::Interest,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Unavailable(format!("failed to declare queue {queue}: {e}")))?;
        debug!(queue = queue, "queue declared");
        Ok(())
    }

    async fn declare_group(&self, queue: &str, group: &str) -> Result<(), BusError> {
        let stream = self.stream(queue).await?;
        stream
            .get_or_create_consumer(group, self.group_config(group))
            .await
            .map_err(|e| {
                BusError::Unavailable(format!("failed to declare group {group} on {queue}: {e}"))
            })?;
        debug!(queue = queue, group = group, "group declared");
        Ok(())
    }

    async fn remove_group(&self, queue: &str, group: &str) -> Result<(), BusError> {
        let stream = self.stream(queue).await?;
        stream.delete_consumer(group).await.map_err(|e| {
            BusError::Unavailable(format!("failed to remove group {group} on {queue}: {e}"))
        })?;
        debug!(queue = queue, group = group, "group removed");
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let publish = async {
            let ack = self
                .context
                .publish(queue.to_owned(), payload.into())
                .await
                .map_err(|e| BusError::Unavailable(format!("failed to publish to {queue}: {e}")))?;
            ack.await.map_err(|e| {
                BusError::Unavailable(format!("publish to {queue} not acknowledged: {e}"))
            })
        };
        tokio::time::timeout(self.options.publish_timeout, publish)
            .await
            .map_err(|e| BusError::Unavailable(format!("publish to {queue} timed out: {e}")))??;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        group: &str,
        prefetch: usize,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let stream = self.stream(queue).await?;
        let consumer: consumer::PullConsumer = stream
            .get_consumer(group)
            .await
            .map_err(|e| BusError::UnknownGroup {
                queue: queue.to_owned(),
                group: format!("{group} ({e})"),
            })?;
        let expiry = self.options.fetch_expiry;
        let messages = consumer
            .stream()
            .max_messages_per_batch(1)
            .expires(expiry)
            .heartbeat(expiry.checked_div(4).unwrap_or_default())
            .messages()
            .await
            .map_err(|e| {
                BusError::Unavailable(format!("failed to open pull stream on {queue}: {e}"))
            })?;
        Ok(Box::new(JetStreamSubscription {
            messages,
            queue: queue.to_owned(),
            window: Arc::new(Semaphore::new(prefetch.max(1))),
        }))
    }

    async fn inspect_depth(&self, queue: &str) -> Result<u64, BusError> {
        let mut stream = self.stream(queue).await?;
        let info = stream
            .info()
            .await
            .map_err(|e| BusError::Unavailable(format!("failed to inspect {queue}: {e}")))?;
        Ok(info.state.messages)
    }

    async fn purge(&self, queue: &str) -> Result<u64, BusError> {
        let stream = self.stream(queue).await?;
        let response = stream
            .purge()
            .await
            .map_err(|e| BusError::Unavailable(format!("failed to purge {queue}: {e}")))?;
        info!(queue = queue, purged = response.purged, "queue purged");
        Ok(response.purged)
    }
}

impl std::fmt::Debug for JetStreamBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamBus")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// One long-lived pull stream per subscription. Messages the broker has
/// already pushed stay buffered in `messages` when a `next` future is
/// dropped.
struct JetStreamSubscription {
    messages: consumer::pull::Stream,
    queue: String,
    window: Arc<Semaphore>,
}

#[async_trait]
impl Subscription for JetStreamSubscription {
    async fn next(&mut self) -> Result<Box<dyn Delivery>, BusError> {
        let permit = Arc::clone(&self.window)
            .acquire_owned()
            .await
            .map_err(|e| BusError::Unavailable(format!("prefetch window closed: {e}")))?;
        match self.messages.next().await {
            Some(Ok(message)) => {
                let count = message
                    .info()
                    .map(|info| u64::try_from(info.delivered).unwrap_or(1))
                    .unwrap_or(1);
                Ok(Box::new(JetStreamDelivery {
                    message: Some(message),
                    count,
                    _permit: permit,
                }))
            }
            Some(Err(e)) => Err(BusError::Unavailable(format!(
                "delivery from {} failed: {e}",
                self.queue
            ))),
            None => Err(BusError::Unavailable(format!(
                "pull stream on {} ended",
                self.queue
            ))),
        }
    }
}

struct JetStreamDelivery {
    message: Option<jetstream::Message>,
    count: u64,
    _permit: OwnedSemaphorePermit,
}

impl JetStreamDelivery {
    async fn settle(&mut self, kind: AckKind) -> Result<(), BusError> {
        let Some(message) = self.message.take() else {
            return Ok(());
        };
        message
            .ack_with(kind)
            .await
            .map_err(|e| BusError::Unavailable(format!("settlement failed: {e}")))
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        self.message
            .as_ref()
            .map_or(&[][..], |message| message.payload.as_ref())
    }

    fn delivery_count(&self) -> u64 {
        self.count
    }

    async fn ack(mut self: Box<Self>) -> Result<(), BusError> {
        self.settle(AckKind::Ack).await
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<(), BusError> {
        let kind = if requeue { AckKind::Nak(None) } else { AckKind::Term };
        self.settle(kind).await
    }
}

impl Drop for JetStreamDelivery {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            // Without a runtime the broker resends after `ack_wait` instead.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                        warn!(error = %e, "failed to requeue dropped delivery");
                    }
                });
            }
        }
    }
}
