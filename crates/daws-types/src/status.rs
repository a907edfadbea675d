//! Status projections served by the console and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::domain::Domain;
use crate::ids::ControllerId;

/// Phase of the tick coordinator's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorPhase {
    /// At least one required domain has no registered controller.
    AwaitingControllers,
    /// Controllers are registered but not all are ready; no tick in flight.
    AwaitingReady,
    /// A tick is being published.
    Emitting,
    /// A tick is in flight; waiting for the readiness cycle to complete.
    Running,
    /// Emission is halted by an operator.
    Stopped,
}

impl core::fmt::Display for CoordinatorPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::AwaitingControllers => "awaiting controllers",
            Self::AwaitingReady => "awaiting ready",
            Self::Emitting => "emitting",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One registry record as seen from outside the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ControllerView {
    /// Controller id.
    pub id: ControllerId,
    /// Domain served.
    pub kind: Domain,
    /// Readiness for the current cycle.
    pub ready: bool,
    /// Wall-clock time of the first report.
    pub joined_at: DateTime<Utc>,
    /// Wall-clock time of the latest report.
    pub last_seen: DateTime<Utc>,
}

/// Number of registered and ready controllers of one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DomainCount {
    /// Domain.
    pub domain: Domain,
    /// Registered controllers.
    pub registered: u32,
    /// Ready controllers.
    pub ready: u32,
}

/// Coordinator status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CoordinatorStatus {
    /// Current state-machine phase.
    pub phase: CoordinatorPhase,
    /// Whether emission is enabled.
    pub running: bool,
    /// Number of ticks emitted so far.
    pub ticks_emitted: u64,
    /// Current simulated time.
    pub sim_time: DateTime<Utc>,
    /// Current wall-clock time.
    pub real_time: DateTime<Utc>,
    /// Domains that must be represented before a tick is emitted.
    pub required: Vec<Domain>,
    /// Per-domain controller counts.
    pub domains: Vec<DomainCount>,
    /// Every registered controller.
    pub controllers: Vec<ControllerView>,
    /// Wall-clock duration of the last completed tick cycle in milliseconds.
    pub last_tick_ms: Option<u64>,
    /// Ticks that exceeded the settings budget.
    pub slow_ticks: u64,
    /// Ticks emitted through the out-of-band trigger.
    pub forced_ticks: u64,
    /// Controllers evicted for staleness.
    pub evictions: u64,
    /// Ready reports that carried a degradation detail.
    pub degraded_reports: u64,
    /// Most recent degradation detail.
    pub last_detail: Option<String>,
}
