//! In-process bus adapter.
//!
//! [`MemoryBus`] implements the full [`MessageBus`] contract inside one
//! process: durable groups, competing consumers, broadcast between groups,
//! prefetch windows, requeue on drop, and depth counting. It backs the test
//! suites and single-process demos. Every publish and settlement is also
//! appended to a journal that tests can inspect to assert ordering.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::bus::{Delivery, MessageBus, Subscription};
use crate::error::BusError;

/// One entry of the [`MemoryBus`] journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A message was stored on a queue.
    Published {
        /// Queue name.
        queue: String,
        /// Sequence number assigned to the message.
        seq: u64,
    },
    /// A delivery was acknowledged.
    Acked {
        /// Queue name.
        queue: String,
        /// Group that settled it.
        group: String,
        /// Sequence number of the message.
        seq: u64,
    },
    /// A delivery was rejected.
    Nacked {
        /// Queue name.
        queue: String,
        /// Group that settled it.
        group: String,
        /// Sequence number of the message.
        seq: u64,
        /// Whether it went back on the queue.
        requeue: bool,
    },
}

/// In-memory [`MessageBus`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, Queue>,
    journal: Vec<BusEvent>,
}

#[derive(Debug, Default)]
struct Queue {
    next_seq: u64,
    messages: BTreeMap<u64, Stored>,
    groups: HashMap<String, Group>,
}

#[derive(Debug)]
struct Stored {
    payload: Arc<[u8]>,
    awaiting: HashSet<String>,
}

#[derive(Debug, Default)]
struct Group {
    pending: VecDeque<u64>,
    in_flight: HashSet<u64>,
    deliveries: HashMap<u64, u64>,
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Ack,
    Drop,
    Requeue,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every publish and settlement so far, in order.
    pub fn journal(&self) -> Result<Vec<BusEvent>, BusError> {
        Ok(self.inner.lock()?.journal.clone())
    }

    /// Number of messages waiting (not in flight) for `group` on `queue`.
    pub fn pending(&self, queue: &str, group: &str) -> Result<usize, BusError> {
        let state = self.inner.lock()?;
        let group = state
            .queues
            .get(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?
            .groups
            .get(group)
            .ok_or_else(|| BusError::UnknownGroup {
                queue: queue.to_owned(),
                group: group.to_owned(),
            })?;
        Ok(group.pending.len())
    }
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>, BusError> {
        self.state
            .lock()
            .map_err(|e| BusError::Unavailable(format!("memory bus lock poisoned: {e}")))
    }

    fn take(&self, queue: &str, group: &str) -> Result<Option<(u64, Arc<[u8]>, u64)>, BusError> {
        let mut state = self.lock()?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?;
        let Queue {
            messages, groups, ..
        } = q;
        let g = groups.get_mut(group).ok_or_else(|| BusError::UnknownGroup {
            queue: queue.to_owned(),
            group: group.to_owned(),
        })?;
        while let Some(seq) = g.pending.pop_front() {
            let Some(stored) = messages.get(&seq) else {
                continue;
            };
            if !stored.awaiting.contains(group) {
                continue;
            }
            let count = g.deliveries.entry(seq).or_insert(0);
            *count = count.saturating_add(1);
            let count = *count;
            g.in_flight.insert(seq);
            return Ok(Some((seq, Arc::clone(&stored.payload), count)));
        }
        Ok(None)
    }

    fn settle(&self, queue: &str, group: &str, seq: u64, how: Settle) -> Result<(), BusError> {
        let mut state = self.lock()?;
        let State { queues, journal } = &mut *state;
        let Some(q) = queues.get_mut(queue) else {
            return Ok(());
        };
        let Some(g) = q.groups.get_mut(group) else {
            return Ok(());
        };
        if !g.in_flight.remove(&seq) {
            return Ok(());
        }
        match how {
            Settle::Requeue => {
                if q.messages.contains_key(&seq) {
                    g.pending.push_front(seq);
                }
            }
            Settle::Ack | Settle::Drop => {
                g.deliveries.remove(&seq);
                let emptied = q.messages.get_mut(&seq).is_some_and(|stored| {
                    stored.awaiting.remove(group);
                    stored.awaiting.is_empty()
                });
                if emptied {
                    q.messages.remove(&seq);
                }
            }
        }
        journal.push(match how {
            Settle::Ack => BusEvent::Acked {
                queue: queue.to_owned(),
                group: group.to_owned(),
                seq,
            },
            Settle::Drop | Settle::Requeue => BusEvent::Nacked {
                queue: queue.to_owned(),
                group: group.to_owned(),
                seq,
                requeue: matches!(how, Settle::Requeue),
            },
        });
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn declare_queue(&self, queue: &str) -> Result<(), BusError> {
        self.inner
            .lock()?
            .queues
            .entry(queue.to_owned())
            .or_default();
        Ok(())
    }

    async fn declare_group(&self, queue: &str, group: &str) -> Result<(), BusError> {
        let mut state = self.inner.lock()?;
        state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?
            .groups
            .entry(group.to_owned())
            .or_default();
        Ok(())
    }

    async fn remove_group(&self, queue: &str, group: &str) -> Result<(), BusError> {
        let mut state = self.inner.lock()?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?;
        if q.groups.remove(group).is_some() {
            q.messages.retain(|_, stored| {
                stored.awaiting.remove(group);
                !stored.awaiting.is_empty()
            });
        }
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut state = self.inner.lock()?;
        let State { queues, journal } = &mut *state;
        let q = queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?;
        let seq = q.next_seq;
        q.next_seq = seq.saturating_add(1);
        journal.push(BusEvent::Published {
            queue: queue.to_owned(),
            seq,
        });
        if q.groups.is_empty() {
            trace!(queue, seq, "no groups declared, message dropped");
            return Ok(());
        }
        let awaiting: HashSet<String> = q.groups.keys().cloned().collect();
        for group in q.groups.values_mut() {
            group.pending.push_back(seq);
        }
        q.messages.insert(
            seq,
            Stored {
                payload: Arc::from(payload),
                awaiting,
            },
        );
        drop(state);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        group: &str,
        prefetch: usize,
    ) -> Result<Box<dyn Subscription>, BusError> {
        {
            let state = self.inner.lock()?;
            let q = state
                .queues
                .get(queue)
                .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?;
            if !q.groups.contains_key(group) {
                return Err(BusError::UnknownGroup {
                    queue: queue.to_owned(),
                    group: group.to_owned(),
                });
            }
        }
        Ok(Box::new(MemorySubscription {
            inner: Arc::clone(&self.inner),
            queue: queue.to_owned(),
            group: group.to_owned(),
            window: Arc::new(Semaphore::new(prefetch.max(1))),
        }))
    }

    async fn inspect_depth(&self, queue: &str) -> Result<u64, BusError> {
        let state = self.inner.lock()?;
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?;
        Ok(u64::try_from(q.messages.len()).unwrap_or(u64::MAX))
    }

    async fn purge(&self, queue: &str) -> Result<u64, BusError> {
        let mut state = self.inner.lock()?;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BusError::UnknownQueue(queue.to_owned()))?;
        let purged = u64::try_from(q.messages.len()).unwrap_or(u64::MAX);
        q.messages.clear();
        for group in q.groups.values_mut() {
            group.pending.clear();
            group.deliveries.clear();
        }
        Ok(purged)
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    queue: String,
    group: String,
    window: Arc<Semaphore>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Box<dyn Delivery>, BusError> {
        let permit = Arc::clone(&self.window)
            .acquire_owned()
            .await
            .map_err(|e| BusError::Unavailable(format!("prefetch window closed: {e}")))?;
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some((seq, payload, count)) = self.inner.take(&self.queue, &self.group)? {
                return Ok(Box::new(MemoryDelivery {
                    inner: Arc::clone(&self.inner),
                    queue: self.queue.clone(),
                    group: self.group.clone(),
                    seq,
                    payload,
                    count,
                    settled: false,
                    _permit: permit,
                }));
            }
            notified.await;
        }
    }
}

struct MemoryDelivery {
    inner: Arc<Inner>,
    queue: String,
    group: String,
    seq: u64,
    payload: Arc<[u8]>,
    count: u64,
    settled: bool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn delivery_count(&self) -> u64 {
        self.count
    }

    async fn ack(mut self: Box<Self>) -> Result<(), BusError> {
        self.settled = true;
        self.inner
            .settle(&self.queue, &self.group, self.seq, Settle::Ack)
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<(), BusError> {
        self.settled = true;
        let how = if requeue { Settle::Requeue } else { Settle::Drop };
        self.inner.settle(&self.queue, &self.group, self.seq, how)
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            let _ = self
                .inner
                .settle(&self.queue, &self.group, self.seq, Settle::Requeue);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn bus_with(queue: &str, groups: &[&str]) -> MemoryBus {
        let bus = MemoryBus::new();
        bus.declare_queue(queue).await.unwrap();
        for group in groups {
            bus.declare_group(queue, group).await.unwrap();
        }
        bus
    }

    #[tokio::test]
    async fn distinct_groups_each_receive_every_message() {
        let bus = bus_with("q", &["a", "b"]).await;
        bus.publish("q", b"one".to_vec()).await.unwrap();

        let mut a = bus.consume("q", "a", 1).await.unwrap();
        let mut b = bus.consume("q", "b", 1).await.unwrap();
        let from_a = a.next().await.unwrap();
        let from_b = b.next().await.unwrap();
        assert_eq!(from_a.payload(), b"one");
        assert_eq!(from_b.payload(), b"one");

        from_a.ack().await.unwrap();
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 1);
        from_b.ack().await.unwrap();
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consumers_in_one_group_compete() {
        let bus = bus_with("q", &["workers"]).await;
        bus.publish("q", b"1".to_vec()).await.unwrap();
        bus.publish("q", b"2".to_vec()).await.unwrap();

        let mut first = bus.consume("q", "workers", 1).await.unwrap();
        let mut second = bus.consume("q", "workers", 1).await.unwrap();
        let x = first.next().await.unwrap();
        let y = second.next().await.unwrap();
        assert_ne!(x.payload(), y.payload());
        assert_eq!(bus.pending("q", "workers").unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_delivery_is_redelivered() {
        let bus = bus_with("q", &["g"]).await;
        bus.publish("q", b"job".to_vec()).await.unwrap();
        let mut sub = bus.consume("q", "g", 1).await.unwrap();

        let delivery = sub.next().await.unwrap();
        assert!(!delivery.redelivered());
        drop(delivery);

        let again = sub.next().await.unwrap();
        assert!(again.redelivered());
        assert_eq!(again.delivery_count(), 2);
    }

    #[tokio::test]
    async fn nack_without_requeue_settles_the_message() {
        let bus = bus_with("q", &["g"]).await;
        bus.publish("q", b"bad".to_vec()).await.unwrap();
        let mut sub = bus.consume("q", "g", 1).await.unwrap();
        sub.next().await.unwrap().nack(false).await.unwrap();
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prefetch_window_blocks_until_settlement() {
        let bus = bus_with("q", &["g"]).await;
        bus.publish("q", b"1".to_vec()).await.unwrap();
        bus.publish("q", b"2".to_vec()).await.unwrap();
        let mut sub = bus.consume("q", "g", 1).await.unwrap();

        let held = sub.next().await.unwrap();
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(20), sub.next()).await;
        assert!(blocked.is_err());

        held.ack().await.unwrap();
        let next = sub.next().await.unwrap();
        assert_eq!(next.payload(), b"2");
    }

    #[tokio::test]
    async fn removing_a_group_releases_its_messages() {
        let bus = bus_with("q", &["a", "b"]).await;
        bus.publish("q", b"m".to_vec()).await.unwrap();
        let mut a = bus.consume("q", "a", 1).await.unwrap();
        a.next().await.unwrap().ack().await.unwrap();
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 1);

        bus.remove_group("q", "b").await.unwrap();
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_reports_dropped_count() {
        let bus = bus_with("q", &["g"]).await;
        for _ in 0..3 {
            bus.publish("q", b"x".to_vec()).await.unwrap();
        }
        assert_eq!(bus.purge("q").await.unwrap(), 3);
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn publish_without_groups_is_not_retained() {
        let bus = bus_with("q", &[]).await;
        bus.publish("q", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.inspect_depth("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn late_group_sees_only_new_messages() {
        let bus = bus_with("q", &["early"]).await;
        bus.publish("q", b"old".to_vec()).await.unwrap();
        bus.declare_group("q", "late").await.unwrap();
        bus.publish("q", b"new".to_vec()).await.unwrap();
        assert_eq!(bus.pending("q", "late").unwrap(), 1);
        assert_eq!(bus.pending("q", "early").unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_queue_is_an_error() {
        let bus = MemoryBus::new();
        let result = bus.publish("missing", Vec::new()).await;
        assert!(matches!(result, Err(BusError::UnknownQueue(_))));
    }
}
