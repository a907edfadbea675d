//! Fan-out ledger: which jobs a controller created per tick and which of
//! them are still unsettled.
//!
//! Jobs are keyed by `(tick, entity)`. Registering a tick twice (a
//! redelivered tick message) yields only the jobs that were never
//! published, so a redelivery cannot duplicate jobs. A job leaves the
//! in-flight set when its outcome arrives, when publishing it failed, or
//! when the drain watch gives up on the tick.
//!
//! Only the most recent `retain` ticks are kept; older ticks are forgotten
//! and any later delivery of them is recognised as expired.

use std::collections::{BTreeMap, HashMap};

use daws_types::EntityId;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    InFlight,
    Settled,
}

#[derive(Debug, Clone)]
struct TickJobs {
    jobs: HashMap<EntityId, JobState>,
    started: Instant,
    reported: bool,
    discarded: u64,
    unpublished: u64,
}

/// Result of registering a tick's entity set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Jobs that still have to be published, sorted by entity id.
    Publish(Vec<EntityId>),
    /// The tick is older than the retained window.
    Expired,
}

/// Per-controller record of fanned-out jobs.
#[derive(Debug, Clone)]
pub struct FanoutLedger {
    retain: u64,
    floor: u64,
    ticks: BTreeMap<u64, TickJobs>,
}

impl FanoutLedger {
    /// Create a ledger that remembers the last `retain` ticks (at least one).
    pub fn new(retain: u64) -> Self {
        Self {
            retain: retain.max(1),
            floor: 0,
            ticks: BTreeMap::new(),
        }
    }

    /// Whether `tick` is already tracked.
    pub fn contains(&self, tick: u64) -> bool {
        self.ticks.contains_key(&tick)
    }

    /// Whether `tick` fell out of the retained window.
    pub const fn is_expired(&self, tick: u64) -> bool {
        tick <= self.floor
    }

    /// Register the jobs of `tick` and return the ones still to publish.
    ///
    /// Entities already known for the tick are not registered again; only
    /// jobs that were registered but never published are returned again.
    pub fn register(&mut self, tick: u64, entities: &[EntityId], now: Instant) -> Registration {
        if self.is_expired(tick) {
            return Registration::Expired;
        }
        let jobs = self.ticks.entry(tick).or_insert_with(|| TickJobs {
            jobs: HashMap::new(),
            started: now,
            reported: false,
            discarded: 0,
            unpublished: 0,
        });
        for entity in entities {
            jobs.jobs.entry(*entity).or_insert(JobState::Pending);
        }
        let mut pending: Vec<EntityId> = jobs
            .jobs
            .iter()
            .filter(|(_, state)| **state == JobState::Pending)
            .map(|(entity, _)| *entity)
            .collect();
        pending.sort_unstable();

        let floor = tick.saturating_sub(self.retain);
        if floor > self.floor {
            self.floor = floor;
            self.ticks = self.ticks.split_off(&floor.saturating_add(1));
        }
        Registration::Publish(pending)
    }

    /// Record that the job for `entity` was published.
    pub fn mark_published(&mut self, tick: u64, entity: EntityId) {
        if let Some(state) = self
            .job_mut(tick, entity)
            .filter(|state| **state == JobState::Pending)
        {
            *state = JobState::InFlight;
        }
    }

    /// Record that the job for `entity` could not be published.
    pub fn abandon(&mut self, tick: u64, entity: EntityId) {
        let Some(jobs) = self.ticks.get_mut(&tick) else {
            return;
        };
        let Some(state) = jobs
            .jobs
            .get_mut(&entity)
            .filter(|state| **state != JobState::Settled)
        else {
            return;
        };
        *state = JobState::Settled;
        jobs.unpublished = jobs.unpublished.saturating_add(1);
    }

    /// Settle a job from its outcome. Returns `false` if the job is unknown
    /// or was already settled.
    pub fn settle(&mut self, tick: u64, entity: EntityId, discarded: bool) -> bool {
        let Some(jobs) = self.ticks.get_mut(&tick) else {
            return false;
        };
        let Some(state) = jobs.jobs.get_mut(&entity) else {
            return false;
        };
        if *state == JobState::Settled {
            return false;
        }
        *state = JobState::Settled;
        if discarded {
            jobs.discarded = jobs.discarded.saturating_add(1);
        }
        true
    }

    /// Jobs of `tick` that are not settled yet.
    pub fn outstanding(&self, tick: u64) -> usize {
        self.ticks.get(&tick).map_or(0, |jobs| {
            jobs.jobs
                .values()
                .filter(|state| **state != JobState::Settled)
                .count()
        })
    }

    /// Settle every job of `tick`. Returns how many were outstanding.
    pub fn force_drain(&mut self, tick: u64) -> usize {
        let Some(jobs) = self.ticks.get_mut(&tick) else {
            return 0;
        };
        let mut forced = 0_usize;
        for state in jobs.jobs.values_mut() {
            if *state != JobState::Settled {
                *state = JobState::Settled;
                forced = forced.saturating_add(1);
            }
        }
        forced
    }

    /// Ticks whose readiness has not been reported yet, oldest first.
    pub fn open_ticks(&self) -> Vec<u64> {
        self.ticks
            .iter()
            .filter(|(_, jobs)| !jobs.reported)
            .map(|(tick, _)| *tick)
            .collect()
    }

    /// Mark the readiness of `tick` as reported.
    pub fn mark_reported(&mut self, tick: u64) {
        if let Some(jobs) = self.ticks.get_mut(&tick) {
            jobs.reported = true;
        }
    }

    /// Whether readiness for `tick` was already reported.
    pub fn is_reported(&self, tick: u64) -> bool {
        self.ticks.get(&tick).is_some_and(|jobs| jobs.reported)
    }

    /// Time since `tick` was first registered.
    pub fn elapsed(&self, tick: u64, now: Instant) -> Duration {
        self.ticks
            .get(&tick)
            .map_or(Duration::ZERO, |jobs| now.saturating_duration_since(jobs.started))
    }

    /// Number of jobs of `tick` that were discarded by workers.
    pub fn discarded(&self, tick: u64) -> u64 {
        self.ticks.get(&tick).map_or(0, |jobs| jobs.discarded)
    }

    /// Number of jobs of `tick` that could not be published.
    pub fn unpublished(&self, tick: u64) -> u64 {
        self.ticks.get(&tick).map_or(0, |jobs| jobs.unpublished)
    }

    /// Number of jobs registered for `tick`.
    pub fn registered(&self, tick: u64) -> usize {
        self.ticks.get(&tick).map_or(0, |jobs| jobs.jobs.len())
    }

    fn job_mut(&mut self, tick: u64, entity: EntityId) -> Option<&mut JobState> {
        self.ticks.get_mut(&tick)?.jobs.get_mut(&entity)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn entities(count: usize) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = (0..count).map(|_| EntityId::new()).collect();
        ids.sort_unstable();
        ids
    }

    fn publish_all(ledger: &mut FanoutLedger, tick: u64, ids: &[EntityId]) {
        for id in ids {
            ledger.mark_published(tick, *id);
        }
    }

    #[test]
    fn redelivered_tick_publishes_nothing_new() {
        let mut ledger = FanoutLedger::new(4);
        let ids = entities(3);
        assert_eq!(
            ledger.register(5, &ids, Instant::now()),
            Registration::Publish(ids.clone())
        );
        publish_all(&mut ledger, 5, &ids);
        assert_eq!(
            ledger.register(5, &ids, Instant::now()),
            Registration::Publish(Vec::new())
        );
        assert_eq!(ledger.registered(5), 3);
    }

    #[test]
    fn unpublished_jobs_are_offered_again() {
        let mut ledger = FanoutLedger::new(4);
        let ids = entities(2);
        ledger.register(1, &ids, Instant::now());
        ledger.mark_published(1, ids[0]);
        assert_eq!(
            ledger.register(1, &[], Instant::now()),
            Registration::Publish(vec![ids[1]])
        );
    }

    #[test]
    fn outcomes_drain_the_tick() {
        let mut ledger = FanoutLedger::new(4);
        let ids = entities(3);
        ledger.register(5, &ids, Instant::now());
        publish_all(&mut ledger, 5, &ids);
        assert_eq!(ledger.outstanding(5), 3);
        assert!(ledger.settle(5, ids[0], false));
        assert!(ledger.settle(5, ids[1], true));
        assert!(!ledger.settle(5, ids[1], false));
        assert!(!ledger.settle(4, ids[2], false));
        assert_eq!(ledger.outstanding(5), 1);
        assert!(ledger.settle(5, ids[2], false));
        assert_eq!(ledger.outstanding(5), 0);
        assert_eq!(ledger.discarded(5), 1);
    }

    #[test]
    fn old_ticks_expire() {
        let mut ledger = FanoutLedger::new(2);
        for tick in 1..=5 {
            ledger.register(tick, &entities(1), Instant::now());
        }
        assert!(ledger.is_expired(3));
        assert!(!ledger.contains(3));
        assert!(ledger.contains(4));
        assert_eq!(
            ledger.register(2, &entities(1), Instant::now()),
            Registration::Expired
        );
    }

    #[test]
    fn force_drain_forgets_outstanding_jobs() {
        let mut ledger = FanoutLedger::new(4);
        let ids = entities(4);
        ledger.register(2, &ids, Instant::now());
        publish_all(&mut ledger, 2, &ids);
        ledger.settle(2, ids[0], false);
        ledger.abandon(2, ids[1]);
        assert_eq!(ledger.unpublished(2), 1);
        assert_eq!(ledger.force_drain(2), 2);
        assert_eq!(ledger.outstanding(2), 0);
    }

    #[test]
    fn reported_ticks_are_closed() {
        let mut ledger = FanoutLedger::new(4);
        ledger.register(1, &[], Instant::now());
        ledger.register(2, &[], Instant::now());
        ledger.mark_reported(1);
        assert_eq!(ledger.open_ticks(), vec![2]);
        assert!(ledger.is_reported(1));
        assert!(!ledger.is_reported(2));
        assert!(!ledger.is_reported(3));
    }
}
