//! Configuration error model.

use thiserror::Error;

/// Result type used for catalog lookups and configuration parsing.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration-level error.
///
/// These are deterministic failures of the static enrichment setup. None of
/// them should ever block a caller's write path: the coordinator recovers
/// from `MissingConfiguration` by degrading to `Strategy::Async`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The entity type was never registered in the strategy catalog.
    #[error("no strategy configuration registered for entity type '{0}'")]
    MissingConfiguration(String),

    /// A configuration value could not be parsed.
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    pub fn missing(entity_type: impl Into<String>) -> Self {
        Self::MissingConfiguration(entity_type.into())
    }

    pub fn invalid(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
        }
    }
}
