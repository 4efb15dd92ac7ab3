use thiserror::Error;

/// Convenience type alias for Results with KernelError
pub type Result<T> = std::result::Result<T, KernelError>;

/// Main error type for the coordination kernel.
///
/// Variants map directly onto the error taxonomy: bad input that never
/// mutates state (`Validation`), references to an absent task/agent/
/// session/lock (`NotFound`), caps exceeded (`Capacity`), lock or
/// concurrency contention (`Busy`), deadline overruns (`Timeout`), and the
/// two recovery tiers the health monitor escalates through
/// (`Recoverable`, `Fatal`).
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Recoverable failure: {0}")]
    Recoverable(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Unauthorized")]
    Unauthorized,
}

impl KernelError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn capacity(msg: impl Into<String>) -> Self {
        Self::Capacity(msg.into())
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn recoverable(msg: impl Into<String>) -> Self {
        Self::Recoverable(msg.into())
    }
}
