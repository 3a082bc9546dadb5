//! Processing strategy: where and when enrichment work runs.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How enrichment work for an entity mutation is executed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// No preference; defer to the next level of configuration.
    #[default]
    Auto,
    /// Run inline, in the caller's execution context.
    Sync,
    /// Defer to the queue with latency-sensitive priority.
    Async,
    /// Defer to the queue as bulk, eventually-consistent work.
    Batch,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [Strategy::Auto, Strategy::Sync, Strategy::Async, Strategy::Batch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Auto => "AUTO",
            Strategy::Sync => "SYNC",
            Strategy::Async => "ASYNC",
            Strategy::Batch => "BATCH",
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Strategy::Auto)
    }

    /// `Some(self)` unless this is `Auto`.
    pub fn explicit(self) -> Option<Strategy> {
        if self.is_auto() { None } else { Some(self) }
    }

    /// Whether work under this strategy goes through the queue.
    pub fn is_deferred(&self) -> bool {
        !matches!(self, Strategy::Sync)
    }
}

impl core::fmt::Display for Strategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(Strategy::Auto),
            "SYNC" => Ok(Strategy::Sync),
            "ASYNC" => Ok(Strategy::Async),
            "BATCH" => Ok(Strategy::Batch),
            _ => Err(ConfigError::invalid("strategy", s)),
        }
    }
}
