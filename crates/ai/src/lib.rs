//! `enrich-ai`
//!
//! **Responsibility:** boundary to the AI providers that do the actual
//! enrichment (embedding generation, search indexing, analysis, removal,
//! cleanup).
//!
//! This crate defines the capability interface and its per-entity-type
//! configuration. It does not know about queues or strategies:
//! - It must not decide *when* work runs, only *what* a run does.
//! - Providers (vector databases, LLM calls) plug in behind
//!   [`EnrichmentCapabilities`].

pub mod capability;
pub mod config;
pub mod execute;
pub mod recording;
pub mod result;

pub use capability::EnrichmentCapabilities;
pub use config::{EntityConfig, EntityConfigRegistry};
pub use execute::execute_plan;
pub use recording::{CapabilityCall, RecordingCapabilities};
pub use result::{CapabilityError, CapabilityResult};
