//! Controller registry owned by the tick coordinator.
//!
//! The registry maps controller ids to their domain and readiness. It is
//! mutated only inside the coordinator task, so every update and the
//! readiness computation that follows it happen in one step.
//!
//! # Report rules
//!
//! | Report | Unknown id | Known id |
//! |--------|------------|----------|
//! | exit | ignored | record removed |
//! | join / heartbeat (no tick) | inserted with the report's readiness | `last_seen` refreshed |
//! | ready for the current tick | inserted | readiness updated |
//! | ready for an older tick | inserted not-ready | `last_seen` refreshed |

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use daws_types::{ControllerId, ControllerReport, ControllerView, Domain, DomainCount};

/// One registered controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRecord {
    /// Controller id.
    pub id: ControllerId,
    /// Domain served.
    pub kind: Domain,
    /// Whether the controller finished the current tick.
    pub ready: bool,
    /// Wall-clock time of the first report.
    pub joined_at: DateTime<Utc>,
    /// Wall-clock time of the latest report.
    pub last_seen: DateTime<Utc>,
    /// When the record was last flipped to not-ready by an emission.
    pub not_ready_since: Option<DateTime<Utc>>,
}

impl ControllerRecord {
    /// Outside view of the record.
    pub const fn view(&self) -> ControllerView {
        ControllerView {
            id: self.id,
            kind: self.kind,
            ready: self.ready,
            joined_at: self.joined_at,
            last_seen: self.last_seen,
        }
    }
}

/// What applying a report did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportEffect {
    /// A new record was inserted.
    Joined,
    /// An existing record's readiness was updated.
    Updated,
    /// The report referred to an older tick; only liveness was refreshed.
    Stale,
    /// A join or heartbeat from a known controller.
    Heartbeat,
    /// The record was removed.
    Removed,
    /// An exit for an id that is not registered.
    UnknownExit,
}

/// Registry of live controllers keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ControllerRegistry {
    records: BTreeMap<ControllerId, ControllerRecord>,
}

impl ControllerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one controller report.
    ///
    /// `current_tick` is the index of the most recently emitted tick; a
    /// ready report for an older tick does not make a controller ready.
    pub fn apply(
        &mut self,
        report: &ControllerReport,
        current_tick: u64,
        now: DateTime<Utc>,
    ) -> ReportEffect {
        if report.exit {
            return match self.records.remove(&report.controller_id) {
                Some(_) => ReportEffect::Removed,
                None => ReportEffect::UnknownExit,
            };
        }

        let current = report.tick.is_none_or(|tick| tick >= current_tick);
        let Some(record) = self.records.get_mut(&report.controller_id) else {
            let ready = report.ready && current;
            self.records.insert(
                report.controller_id,
                ControllerRecord {
                    id: report.controller_id,
                    kind: report.kind,
                    ready,
                    joined_at: now,
                    last_seen: now,
                    not_ready_since: (!ready).then_some(now),
                },
            );
            return ReportEffect::Joined;
        };

        record.last_seen = now;
        if report.tick.is_none() {
            return ReportEffect::Heartbeat;
        }
        if !current {
            return ReportEffect::Stale;
        }
        record.ready = report.ready;
        record.not_ready_since = if report.ready {
            None
        } else {
            record.not_ready_since.or(Some(now))
        };
        ReportEffect::Updated
    }

    /// Flip every record to not-ready at the start of an emission.
    pub fn mark_all_not_ready(&mut self, now: DateTime<Utc>) {
        for record in self.records.values_mut() {
            record.ready = false;
            record.not_ready_since = Some(now);
        }
    }

    /// Remove and return records that stayed not-ready for longer than
    /// `timeout`.
    pub fn evict_stale(&mut self, now: DateTime<Utc>, timeout: TimeDelta) -> Vec<ControllerRecord> {
        let stale: Vec<ControllerId> = self
            .records
            .values()
            .filter(|record| {
                !record.ready
                    && record
                        .not_ready_since
                        .is_some_and(|since| now.signed_duration_since(since) > timeout)
            })
            .map(|record| record.id)
            .collect();
        stale
            .iter()
            .filter_map(|id| self.records.remove(id))
            .collect()
    }

    /// Registered and ready counts for `domain`.
    ///
    /// Walks every record of the domain; a not-ready record does not cut
    /// the pass short.
    pub fn count(&self, domain: Domain) -> DomainCount {
        let mut count = DomainCount {
            domain,
            registered: 0,
            ready: 0,
        };
        for record in self.records.values().filter(|record| record.kind == domain) {
            count.registered = count.registered.saturating_add(1);
            if record.ready {
                count.ready = count.ready.saturating_add(1);
            }
        }
        count
    }

    /// Whether every domain in `required` has at least one registered
    /// controller.
    pub fn covers(&self, required: &[Domain]) -> bool {
        required
            .iter()
            .all(|domain| self.count(*domain).registered > 0)
    }

    /// Whether every domain in `required` has at least one ready controller.
    pub fn has_ready(&self, required: &[Domain]) -> bool {
        required.iter().all(|domain| self.count(*domain).ready > 0)
    }

    /// The first domain of `required` without a ready controller.
    pub fn first_unready(&self, required: &[Domain]) -> Option<Domain> {
        required
            .iter()
            .copied()
            .find(|domain| self.count(*domain).ready == 0)
    }

    /// Whether every registered controller is ready.
    ///
    /// Computed with a full pass per domain so the per-domain counts and
    /// the result always agree.
    pub fn all_ready(&self) -> bool {
        let mut all = true;
        for domain in Domain::ALL {
            let count = self.count(domain);
            all &= count.ready == count.registered;
        }
        all
    }

    /// Sorted ids of the controllers serving `domain`.
    pub fn roster(&self, domain: Domain) -> Vec<ControllerId> {
        self.records
            .values()
            .filter(|record| record.kind == domain)
            .map(|record| record.id)
            .collect()
    }

    /// Look up one record.
    pub fn get(&self, id: ControllerId) -> Option<&ControllerRecord> {
        self.records.get(&id)
    }

    /// Outside views of every record, ordered by id.
    pub fn views(&self) -> Vec<ControllerView> {
        self.records.values().map(ControllerRecord::view).collect()
    }

    /// Number of registered controllers.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no controller is registered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn join_inserts_ready_record() {
        let mut registry = ControllerRegistry::new();
        let id = ControllerId::new();
        let effect = registry.apply(&ControllerReport::join(id, Domain::City), 0, now());
        assert_eq!(effect, ReportEffect::Joined);
        assert!(registry.get(id).unwrap().ready);
        assert!(registry.all_ready());
        assert!(!registry.covers(&Domain::ALL));
        assert!(registry.covers(&[Domain::City]));
    }

    #[test]
    fn stale_ready_does_not_count() {
        let mut registry = ControllerRegistry::new();
        let id = ControllerId::new();
        registry.apply(&ControllerReport::join(id, Domain::City), 0, now());
        registry.mark_all_not_ready(now());

        let effect = registry.apply(&ControllerReport::ready(id, Domain::City, 3), 4, now());
        assert_eq!(effect, ReportEffect::Stale);
        assert!(!registry.get(id).unwrap().ready);

        let effect = registry.apply(&ControllerReport::ready(id, Domain::City, 4), 4, now());
        assert_eq!(effect, ReportEffect::Updated);
        assert!(registry.get(id).unwrap().ready);
    }

    #[test]
    fn heartbeat_keeps_readiness() {
        let mut registry = ControllerRegistry::new();
        let id = ControllerId::new();
        registry.apply(&ControllerReport::join(id, Domain::Traffic), 0, now());
        registry.mark_all_not_ready(now());
        let later = now() + TimeDelta::seconds(5);
        let effect = registry.apply(&ControllerReport::join(id, Domain::Traffic), 1, later);
        assert_eq!(effect, ReportEffect::Heartbeat);
        let record = registry.get(id).unwrap();
        assert!(!record.ready);
        assert_eq!(record.last_seen, later);
    }

    #[test]
    fn all_ready_sees_every_domain() {
        let mut registry = ControllerRegistry::new();
        let city = ControllerId::new();
        let traffic = ControllerId::new();
        registry.apply(&ControllerReport::join(city, Domain::City), 0, now());
        registry.apply(&ControllerReport::join(traffic, Domain::Traffic), 0, now());
        registry.mark_all_not_ready(now());
        registry.apply(&ControllerReport::ready(city, Domain::City, 1), 1, now());
        assert!(!registry.all_ready());
        assert_eq!(registry.first_unready(&Domain::ALL), Some(Domain::Traffic));
        registry.apply(&ControllerReport::ready(traffic, Domain::Traffic, 1), 1, now());
        assert!(registry.all_ready());
    }

    #[test]
    fn evicts_only_controllers_past_the_timeout() {
        let mut registry = ControllerRegistry::new();
        let slow = ControllerId::new();
        let fast = ControllerId::new();
        registry.apply(&ControllerReport::join(slow, Domain::City), 0, now());
        registry.apply(&ControllerReport::join(fast, Domain::City), 0, now());
        registry.mark_all_not_ready(now());
        registry.apply(&ControllerReport::ready(fast, Domain::City, 1), 1, now());

        let timeout = TimeDelta::seconds(10);
        assert!(registry.evict_stale(now() + TimeDelta::seconds(10), timeout).is_empty());
        let evicted = registry.evict_stale(now() + TimeDelta::seconds(11), timeout);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted.first().unwrap().id, slow);
        assert_eq!(registry.roster(Domain::City), vec![fast]);
    }

    #[test]
    fn roster_is_sorted() {
        let mut registry = ControllerRegistry::new();
        for _ in 0..5 {
            registry.apply(
                &ControllerReport::join(ControllerId::new(), Domain::Traffic),
                0,
                now(),
            );
        }
        let roster = registry.roster(Domain::Traffic);
        let mut sorted = roster.clone();
        sorted.sort_unstable();
        assert_eq!(roster, sorted);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(usize, bool),
        Ready(usize, u64),
        Exit(usize),
        Emit,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..6_usize, any::<bool>()).prop_map(|(who, city)| Op::Join(who, city)),
            (0..6_usize, 0..4_u64).prop_map(|(who, tick)| Op::Ready(who, tick)),
            (0..6_usize).prop_map(Op::Exit),
            Just(Op::Emit),
        ]
    }

    proptest! {
        #[test]
        fn ids_stay_unique_and_exit_removes_exactly_one(ops in prop::collection::vec(op(), 1..60)) {
            let ids: Vec<ControllerId> = (0..6).map(|_| ControllerId::new()).collect();
            let mut registry = ControllerRegistry::new();
            let mut tick = 0_u64;
            for op in ops {
                match op {
                    Op::Join(who, city) => {
                        let kind = if city { Domain::City } else { Domain::Traffic };
                        registry.apply(&ControllerReport::join(ids[who], kind), tick, now());
                    }
                    Op::Ready(who, offset) => {
                        let before = registry.len();
                        let known = registry.get(ids[who]).map(|record| record.kind);
                        let kind = known.unwrap_or(Domain::City);
                        let at = tick.saturating_sub(offset);
                        registry.apply(&ControllerReport::ready(ids[who], kind, at), tick, now());
                        let expected = if known.is_some() { before } else { before + 1 };
                        prop_assert_eq!(registry.len(), expected);
                    }
                    Op::Exit(who) => {
                        let before: Vec<ControllerId> = registry.views().iter().map(|view| view.id).collect();
                        let present = before.contains(&ids[who]);
                        registry.apply(&ControllerReport::exit(ids[who], Domain::City), tick, now());
                        let after: Vec<ControllerId> = registry.views().iter().map(|view| view.id).collect();
                        let expected: Vec<ControllerId> = before.into_iter().filter(|id| *id != ids[who]).collect();
                        prop_assert_eq!(&after, &expected);
                        prop_assert_eq!(registry.get(ids[who]).is_none(), true);
                        if !present {
                            prop_assert_eq!(after.len(), registry.len());
                        }
                    }
                    Op::Emit => {
                        registry.mark_all_not_ready(now());
                        tick += 1;
                    }
                }
                let views = registry.views();
                let mut unique: Vec<ControllerId> = views.iter().map(|view| view.id).collect();
                unique.dedup();
                prop_assert_eq!(unique.len(), views.len());
            }
        }
    }
}
