use std::sync::Arc;

use enrich_core::{Action, EntityDocument};

use crate::config::EntityConfig;
use crate::result::CapabilityResult;

/// The enrichment operations a provider stack exposes.
///
/// Deferred work is delivered at least once, so every operation must be
/// idempotent: running it twice for the same document must leave the same
/// end state as running it once.
pub trait EnrichmentCapabilities: Send + Sync {
    fn generate_embeddings(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()>;

    fn index_for_search(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()>;

    fn analyze_entity(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()>;

    fn remove_from_search(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()>;

    fn cleanup_embeddings(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()>;

    /// Dispatch a single [`Action`] to the matching operation.
    fn perform(&self, action: Action, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()> {
        match action {
            Action::GenerateEmbedding => self.generate_embeddings(entity, config),
            Action::IndexForSearch => self.index_for_search(entity, config),
            Action::Analyze => self.analyze_entity(entity, config),
            Action::RemoveFromSearch => self.remove_from_search(entity, config),
            Action::CleanupEmbeddings => self.cleanup_embeddings(entity, config),
        }
    }
}

impl<C> EnrichmentCapabilities for Arc<C>
where
    C: EnrichmentCapabilities + ?Sized,
{
    fn generate_embeddings(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()> {
        (**self).generate_embeddings(entity, config)
    }

    fn index_for_search(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()> {
        (**self).index_for_search(entity, config)
    }

    fn analyze_entity(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()> {
        (**self).analyze_entity(entity, config)
    }

    fn remove_from_search(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()> {
        (**self).remove_from_search(entity, config)
    }

    fn cleanup_embeddings(&self, entity: &EntityDocument, config: &EntityConfig) -> CapabilityResult<()> {
        (**self).cleanup_embeddings(entity, config)
    }
}
