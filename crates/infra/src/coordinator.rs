//! Enrichment coordination (entry point for entity lifecycle hooks).
//!
//! ```text
//! handle(entity, type, operation, plan, override)
//!   ↓
//! 1. No entity or empty plan → Skipped (no resolution, no writes)
//!   ↓
//! 2. Resolve strategy (missing configuration degrades to ASYNC)
//!   ↓
//! 3a. SYNC  → run the plan inline against the capabilities
//! 3b. other → snapshot the entity and enqueue a PENDING entry
//! ```
//!
//! There is no retry inside the coordinator. Inline failures go straight back
//! to the caller; deferred work is retried by the queue.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use enrich_ai::{CapabilityError, EnrichmentCapabilities, EntityConfigRegistry, execute_plan};
use enrich_core::{
    ActionPlan, EnrichableEntity, EntityDocument, Operation, QueueEntryId, Strategy, StrategyCatalog,
    resolve_strategy,
};

use crate::queue::{QueueEntry, QueueStore, QueueStoreError};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The entity has no id yet, so neither path can address it.
    #[error("entity of type '{entity_type}' has no id")]
    MissingEntityId { entity_type: String },
    #[error("failed to snapshot entity: {0}")]
    Serialization(String),
    /// Inline capability failure; never retried.
    #[error("inline enrichment failed: {0}")]
    Capability(#[from] CapabilityError),
    /// Deferred work could not be persisted.
    #[error("failed to enqueue enrichment: {0}")]
    Enqueue(#[from] QueueStoreError),
}

/// Which path a `handle` call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// No entity or nothing to do.
    Skipped,
    /// Ran synchronously; `actions` capability calls were made.
    ExecutedInline { actions: usize },
    /// Deferred to the queue.
    Enqueued(QueueEntryId),
}

/// Routes entity mutations to inline execution or the queue.
///
/// The catalog and entity configuration registry are built once at startup
/// and never mutated afterwards.
pub struct Coordinator<S, C> {
    catalog: Arc<StrategyCatalog>,
    configs: Arc<EntityConfigRegistry>,
    store: S,
    capabilities: C,
}

impl<S, C> Coordinator<S, C> {
    pub fn new(
        catalog: Arc<StrategyCatalog>,
        configs: Arc<EntityConfigRegistry>,
        store: S,
        capabilities: C,
    ) -> Self {
        Self {
            catalog,
            configs,
            store,
            capabilities,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn capabilities(&self) -> &C {
        &self.capabilities
    }

    pub fn catalog(&self) -> &StrategyCatalog {
        &self.catalog
    }
}

impl<S, C> Coordinator<S, C>
where
    S: QueueStore,
    C: EnrichmentCapabilities,
{
    /// Handle one entity mutation.
    pub fn handle<E>(
        &self,
        entity: Option<&E>,
        entity_type: &str,
        operation: Operation,
        plan: &ActionPlan,
        call_site: Strategy,
    ) -> Result<HandleOutcome, CoordinatorError>
    where
        E: EnrichableEntity + ?Sized,
    {
        // 1) Short-circuit before any lookup or write
        let Some(entity) = entity else {
            return Ok(HandleOutcome::Skipped);
        };
        if !plan.requires_work() {
            return Ok(HandleOutcome::Skipped);
        }

        // 2) Resolve
        let strategy = self.effective_strategy(entity_type, operation, call_site);

        let document = EntityDocument::capture(entity_type, entity)
            .map_err(|e| CoordinatorError::Serialization(e.to_string()))?
            .ok_or_else(|| CoordinatorError::MissingEntityId {
                entity_type: entity_type.to_string(),
            })?;

        // 3a) Inline
        if strategy == Strategy::Sync {
            let config = self.configs.resolve(entity_type);
            let actions = execute_plan(&self.capabilities, &document, &config, plan)?;
            debug!(
                entity_type,
                entity_id = %document.entity_id,
                operation = %operation,
                actions,
                "enrichment executed inline"
            );
            return Ok(HandleOutcome::ExecutedInline { actions });
        }

        // 3b) Deferred
        let entity_id = document.entity_id.clone();
        let entry = QueueEntry::new(
            document,
            operation,
            strategy,
            *plan,
            self.catalog.max_retries_for(entity_type),
            Utc::now(),
        );
        let id = self.store.enqueue(entry)?;

        debug!(
            entity_type,
            entity_id = %entity_id,
            entry_id = %id,
            strategy = %strategy,
            "enrichment enqueued"
        );
        Ok(HandleOutcome::Enqueued(id))
    }

    /// Like `handle`, using the entity type's configured plan for `operation`.
    pub fn handle_configured<E>(
        &self,
        entity: Option<&E>,
        entity_type: &str,
        operation: Operation,
        call_site: Strategy,
    ) -> Result<HandleOutcome, CoordinatorError>
    where
        E: EnrichableEntity + ?Sized,
    {
        let plan = self.configs.resolve(entity_type).action_plan(operation);
        self.handle(entity, entity_type, operation, &plan, call_site)
    }

    fn effective_strategy(&self, entity_type: &str, operation: Operation, call_site: Strategy) -> Strategy {
        match resolve_strategy(&self.catalog, entity_type, operation, call_site) {
            Ok(strategy) => strategy,
            Err(err) => {
                warn!(entity_type, operation = %operation, error = %err, "degrading to ASYNC");
                Strategy::Async
            }
        }
    }
}
