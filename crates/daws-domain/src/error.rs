//! Error types for domain controllers, workers and entity steps.

use daws_bus::BusError;
use daws_store::StoreError;

/// Errors that stop a domain controller.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// The bus failed beyond the retry budget.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

/// Errors that stop a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The bus failed beyond the retry budget.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(String),
}

/// Why a per-entity step did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// The step may succeed if retried (store unreachable).
    #[error("transient: {0}")]
    Transient(String),

    /// The step can never succeed for this job (entity missing, wrong kind).
    #[error("{0}")]
    Permanent(String),
}

impl StepError {
    /// Whether a retry may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}
