//! Error types for the world store.
//!
//! All errors are propagated via [`StoreError`], which wraps the underlying
//! [`fred`] and [`serde_json`] errors with context about which operation
//! failed.

/// Errors that can occur in the world store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// The store cannot be reached right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value has an unexpected shape.
    #[error("Corrupt value at {key}: {detail}")]
    Corrupt {
        /// Key holding the value.
        key: String,
        /// What was wrong with it.
        detail: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether retrying the failed operation may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Dragonfly(_) | Self::Unavailable(_))
    }
}
