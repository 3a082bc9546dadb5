//! `enrich-core`: pure building blocks for entity enrichment.
//!
//! This crate decides *what* enrichment work an entity mutation carries and
//! *how* it should run (inline or deferred). It contains **no IO**: storage,
//! providers and worker loops live in `enrich-infra` / `enrich-ai`.

pub mod catalog;
pub mod entity;
pub mod error;
pub mod id;
pub mod operation;
pub mod plan;
pub mod priority;
pub mod resolver;
pub mod strategy;

pub use catalog::{StrategyCatalog, StrategyConfiguration, DEFAULT_MAX_RETRIES};
pub use entity::{EnrichableEntity, EntityDocument};
pub use error::{ConfigError, ConfigResult};
pub use id::QueueEntryId;
pub use operation::Operation;
pub use plan::{Action, ActionPlan};
pub use priority::{priority_weight, PriorityWeight};
pub use resolver::{resolve, resolve_strategy};
pub use strategy::Strategy;
