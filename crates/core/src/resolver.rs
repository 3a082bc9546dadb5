//! Strategy resolution.
//!
//! Precedence, first non-`Auto` wins:
//!
//! 1. call-site override
//! 2. per-operation field of the entity type's configuration
//! 3. the entity type's default strategy
//! 4. `Strategy::Async`

use crate::catalog::StrategyCatalog;
use crate::error::ConfigResult;
use crate::operation::Operation;
use crate::strategy::Strategy;

/// The bare precedence rule over three candidate strategies.
pub fn resolve(call_site: Strategy, on_operation: Strategy, default: Strategy) -> Strategy {
    call_site
        .explicit()
        .or_else(|| on_operation.explicit())
        .or_else(|| default.explicit())
        .unwrap_or(Strategy::Async)
}

/// Resolve the effective strategy for an entity mutation.
///
/// Fails with [`ConfigError::MissingConfiguration`](crate::ConfigError::MissingConfiguration)
/// when `entity_type` was never registered, regardless of the override.
pub fn resolve_strategy(
    catalog: &StrategyCatalog,
    entity_type: &str,
    operation: Operation,
    call_site: Strategy,
) -> ConfigResult<Strategy> {
    let configuration = catalog.get(entity_type)?;
    Ok(resolve(
        call_site,
        configuration.for_operation(operation),
        configuration.default_strategy(),
    ))
}
