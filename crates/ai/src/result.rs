use thiserror::Error;

pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Failure reported by a capability provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The entity or its configuration cannot be processed; retrying won't help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider error: {0}")]
    Provider(String),

    /// Provider temporarily unreachable (rate limit, timeout, outage).
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CapabilityError {
    /// Whether the deferred path should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, CapabilityError::InvalidInput(_))
    }
}
