//! Startup-time registry of per-entity-type strategy configuration.
//!
//! The catalog is populated once, by calling [`StrategyCatalog::register`] for
//! every known entity type, and is read-only afterwards. Share it behind an
//! `Arc`; no locking is needed.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};
use crate::operation::Operation;
use crate::strategy::Strategy;

/// Retry budget used when neither the catalog nor the entity type override it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Strategy configuration for one entity type.
///
/// `default_strategy` is never `Auto`: an `Auto` default is normalised to
/// `Async` on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyConfiguration {
    default_strategy: Strategy,
    on_create: Strategy,
    on_update: Strategy,
    on_delete: Strategy,
    max_retries: Option<u32>,
}

impl StrategyConfiguration {
    pub fn new(default_strategy: Strategy) -> Self {
        let default_strategy = match default_strategy {
            Strategy::Auto => Strategy::Async,
            other => other,
        };
        Self {
            default_strategy,
            on_create: Strategy::Auto,
            on_update: Strategy::Auto,
            on_delete: Strategy::Auto,
            max_retries: None,
        }
    }

    pub fn on_create(mut self, strategy: Strategy) -> Self {
        self.on_create = strategy;
        self
    }

    pub fn on_update(mut self, strategy: Strategy) -> Self {
        self.on_update = strategy;
        self
    }

    pub fn on_delete(mut self, strategy: Strategy) -> Self {
        self.on_delete = strategy;
        self
    }

    /// Override the catalog-wide retry budget for this entity type.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn default_strategy(&self) -> Strategy {
        self.default_strategy
    }

    /// The per-operation field (may be `Auto`).
    pub fn for_operation(&self, operation: Operation) -> Strategy {
        match operation {
            Operation::Create => self.on_create,
            Operation::Update => self.on_update,
            Operation::Delete => self.on_delete,
        }
    }

    pub fn retry_budget(&self) -> Option<u32> {
        self.max_retries
    }
}

impl Default for StrategyConfiguration {
    fn default() -> Self {
        Self::new(Strategy::Async)
    }
}

/// Map from entity-type identifier to its [`StrategyConfiguration`].
#[derive(Debug, Clone)]
pub struct StrategyCatalog {
    configurations: HashMap<String, StrategyConfiguration>,
    max_retries: u32,
}

impl StrategyCatalog {
    pub fn new() -> Self {
        Self {
            configurations: HashMap::new(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Catalog-wide retry budget for queued entries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Register (or replace) the configuration for an entity type.
    pub fn register(&mut self, entity_type: impl Into<String>, configuration: StrategyConfiguration) -> &mut Self {
        self.configurations.insert(entity_type.into(), configuration);
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, entity_type: impl Into<String>, configuration: StrategyConfiguration) -> Self {
        self.register(entity_type, configuration);
        self
    }

    pub fn get(&self, entity_type: &str) -> ConfigResult<&StrategyConfiguration> {
        self.configurations
            .get(entity_type)
            .ok_or_else(|| ConfigError::missing(entity_type))
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.configurations.contains_key(entity_type)
    }

    /// Retry budget for entries of `entity_type`.
    ///
    /// Unregistered types get the catalog-wide budget.
    pub fn max_retries_for(&self, entity_type: &str) -> u32 {
        self.configurations
            .get(entity_type)
            .and_then(StrategyConfiguration::retry_budget)
            .unwrap_or(self.max_retries)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.configurations.keys().map(String::as_str)
    }
}

impl Default for StrategyCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_default_is_normalised_to_async() {
        let cfg = StrategyConfiguration::new(Strategy::Auto);
        assert_eq!(cfg.default_strategy(), Strategy::Async);
    }

    #[test]
    fn missing_type_is_a_configuration_error() {
        let catalog = StrategyCatalog::new();
        assert_eq!(
            catalog.get("product").unwrap_err(),
            ConfigError::MissingConfiguration("product".to_string())
        );
    }

    #[test]
    fn retry_budget_prefers_entity_override() {
        let catalog = StrategyCatalog::new()
            .with_max_retries(5)
            .with("product", StrategyConfiguration::new(Strategy::Async).max_retries(2))
            .with("order", StrategyConfiguration::new(Strategy::Batch));

        assert_eq!(catalog.max_retries_for("product"), 2);
        assert_eq!(catalog.max_retries_for("order"), 5);
        assert_eq!(catalog.max_retries_for("unknown"), 5);
    }
}
