use thiserror::Error;

/// Top-level error type for hogq operations.
#[derive(Debug, Error)]
pub enum HogqError {
    // --- Store errors (busy timeout exhausted, constraint violation, I/O) ---
    #[error("store error: {0}")]
    Store(String),

    // --- Child process errors ---
    #[error("spawn error: {0}")]
    Spawn(String),

    // --- Operational errors ---
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl HogqError {
    /// Whether this error is transient store contention. The supervisor
    /// loops log these and retry on their next iteration instead of dying.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

/// Result type alias for hogq operations.
pub type Result<T> = std::result::Result<T, HogqError>;
