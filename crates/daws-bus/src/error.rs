//! Error types for the message bus adapter.

/// Errors that can occur while talking to the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The broker is unreachable, the connection dropped, or an operation
    /// timed out. Transient: callers retry with bounded backoff.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// A payload could not be encoded or decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// An operation referenced a queue that was never declared.
    #[error("unknown queue: {0}")]
    UnknownQueue(String),

    /// An operation referenced a consumer group that was never declared.
    #[error("unknown consumer group {group} on queue {queue}")]
    UnknownGroup {
        /// Queue name.
        queue: String,
        /// Group name.
        group: String,
    },
}

impl BusError {
    /// Whether retrying the failed operation may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
