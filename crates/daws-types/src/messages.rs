//! Wire messages exchanged over the bus.
//!
//! All bodies are serialized as JSON with field names preserved so older
//! and newer processes can coexist on the same queues.
//!
//! | Message | Producer | Queue |
//! |---------|----------|-------|
//! | [`TickMessage`] | coordinator | `world_{domain}_queue` |
//! | [`JobMessage`] | domain controller | `{domain}_job_queue` |
//! | [`JobOutcome`] | worker | `{domain}_job_outcome_queue` |
//! | [`ControllerReport`] | domain controller | `world_queue` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::domain::Domain;
use crate::ids::{ControllerId, EntityId};
use crate::settings::WorldSettings;

/// Start of one simulated tick for one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TickMessage {
    /// One-based tick index.
    pub tick: u64,
    /// Simulated time at the start of the tick.
    pub sim_time: DateTime<Utc>,
    /// Settings snapshot valid for this tick.
    pub settings: WorldSettings,
    /// Sorted ids of the domain's registered controllers at emission time.
    #[serde(default)]
    pub roster: Vec<ControllerId>,
}

impl TickMessage {
    /// The share of the entity set that `controller` owns for this tick.
    ///
    /// Returns `None` when the controller is not on the roster (it joined
    /// after the tick was emitted) and therefore owns nothing.
    pub fn partition_for(&self, controller: ControllerId) -> Option<Partition> {
        let index = self.roster.iter().position(|id| *id == controller)?;
        let index = u32::try_from(index).ok()?;
        let count = u32::try_from(self.roster.len()).ok()?;
        Some(Partition { index, count })
    }
}

/// One controller's slice of a domain's entity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    /// Position of the controller on the roster.
    pub index: u32,
    /// Number of controllers on the roster.
    pub count: u32,
}

impl Partition {
    /// A partition that owns every entity.
    pub const WHOLE: Self = Self { index: 0, count: 1 };

    /// Whether `entity` falls into this partition.
    ///
    /// Uses the low 32 bits of the UUID, which are random in both v4 and
    /// v7 identifiers, so the split is even regardless of creation time.
    pub fn owns(self, entity: EntityId) -> bool {
        if self.count <= 1 {
            return true;
        }
        let bytes = entity.into_inner().as_u128().to_be_bytes();
        let low = u32::from_be_bytes([
            *bytes.get(12).unwrap_or(&0),
            *bytes.get(13).unwrap_or(&0),
            *bytes.get(14).unwrap_or(&0),
            *bytes.get(15).unwrap_or(&0),
        ]);
        low.checked_rem(self.count) == Some(self.index)
    }
}

/// A unit of per-entity work for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct JobMessage {
    /// Tick the job belongs to.
    pub tick: u64,
    /// Domain of the entity.
    pub domain: Domain,
    /// Entity to update.
    pub entity: EntityId,
    /// Controller that fanned the job out.
    pub origin: ControllerId,
    /// Simulated time of the tick.
    pub sim_time: DateTime<Utc>,
    /// Settings snapshot valid for the tick.
    pub settings: WorldSettings,
}

/// How a worker settled a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// The step ran and the job was acknowledged.
    Completed,
    /// The job was rejected without requeue.
    Discarded {
        /// Why the job could not be processed.
        reason: String,
    },
}

/// Settlement notice sent by a worker to the job's originating controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct JobOutcome {
    /// Tick the job belonged to.
    pub tick: u64,
    /// Entity the job targeted.
    pub entity: EntityId,
    /// Controller that fanned the job out.
    pub origin: ControllerId,
    /// Settlement.
    pub outcome: JobStatus,
}

/// Readiness, join or exit report sent by a controller to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ControllerReport {
    /// Reporting controller.
    #[serde(rename = "id")]
    pub controller_id: ControllerId,
    /// Domain the controller serves.
    #[serde(rename = "type")]
    pub kind: Domain,
    /// Whether the controller finished its work for the last tick.
    pub ready: bool,
    /// Whether the controller is leaving; terminal.
    #[serde(default)]
    pub exit: bool,
    /// Tick the report refers to, absent for joins and exits.
    #[serde(default)]
    pub tick: Option<u64>,
    /// Degradation detail (aborted fan-out, drain timeout).
    #[serde(default)]
    pub detail: Option<String>,
}

impl ControllerReport {
    /// First report of a freshly started controller; joins as ready.
    pub const fn join(controller_id: ControllerId, kind: Domain) -> Self {
        Self {
            controller_id,
            kind,
            ready: true,
            exit: false,
            tick: None,
            detail: None,
        }
    }

    /// The controller drained all jobs of `tick`.
    pub const fn ready(controller_id: ControllerId, kind: Domain, tick: u64) -> Self {
        Self {
            controller_id,
            kind,
            ready: true,
            exit: false,
            tick: Some(tick),
            detail: None,
        }
    }

    /// The controller gave up on `tick`; ready, but with the reason attached.
    pub const fn degraded(
        controller_id: ControllerId,
        kind: Domain,
        tick: u64,
        detail: String,
    ) -> Self {
        Self {
            controller_id,
            kind,
            ready: true,
            exit: false,
            tick: Some(tick),
            detail: Some(detail),
        }
    }

    /// The controller is shutting down.
    pub const fn exit(controller_id: ControllerId, kind: Domain) -> Self {
        Self {
            controller_id,
            kind,
            ready: false,
            exit: true,
            tick: None,
            detail: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_every_entity_exactly_once() {
        let count = 3;
        for _ in 0..50 {
            let entity = EntityId::new();
            let owners = (0..count)
                .filter(|index| Partition { index: *index, count }.owns(entity))
                .count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn controller_off_roster_owns_nothing() {
        let on = ControllerId::new();
        let off = ControllerId::new();
        let tick = TickMessage {
            tick: 1,
            sim_time: Utc::now(),
            settings: WorldSettings::defaults_at(Utc::now()),
            roster: vec![on],
        };
        assert_eq!(tick.partition_for(on), Some(Partition::WHOLE));
        assert_eq!(tick.partition_for(off), None);
    }

    #[test]
    fn report_uses_legacy_field_names() {
        let id = ControllerId::new();
        let json = serde_json::to_value(ControllerReport::join(id, Domain::City)).unwrap();
        assert_eq!(json["type"], "city");
        assert_eq!(json["ready"], true);
        assert_eq!(json["exit"], false);
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn report_without_optional_fields_decodes() {
        let id = ControllerId::new();
        let json = serde_json::json!({"id": id, "type": "traffic", "ready": false});
        let report: ControllerReport = serde_json::from_value(json).unwrap();
        assert!(!report.exit);
        assert_eq!(report.tick, None);
        assert_eq!(report.kind, Domain::Traffic);
    }

    #[test]
    fn discarded_outcome_carries_reason() {
        let outcome = JobOutcome {
            tick: 2,
            entity: EntityId::new(),
            origin: ControllerId::new(),
            outcome: JobStatus::Discarded {
                reason: String::from("entity missing"),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"]["status"], "discarded");
        assert_eq!(json["outcome"]["reason"], "entity missing");
    }
}
