//! Shared application state for the HTTP API.

use daws_core::CoordinatorHandle;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command and status channel into the coordinator task.
    pub coordinator: CoordinatorHandle,
}

impl AppState {
    /// Create state around a coordinator handle.
    pub const fn new(coordinator: CoordinatorHandle) -> Self {
        Self { coordinator }
    }
}
