use tracing::debug;

use enrich_core::{ActionPlan, EntityDocument};

use crate::capability::EnrichmentCapabilities;
use crate::config::EntityConfig;
use crate::result::CapabilityResult;

/// Run every enabled action of `plan` against `capabilities`, in fixed order.
///
/// The first failure aborts the remaining actions and is returned as-is.
/// Returns the number of actions performed.
pub fn execute_plan<C>(
    capabilities: &C,
    entity: &EntityDocument,
    config: &EntityConfig,
    plan: &ActionPlan,
) -> CapabilityResult<usize>
where
    C: EnrichmentCapabilities + ?Sized,
{
    let mut performed = 0;
    for action in plan.actions() {
        debug!(
            entity_type = %entity.entity_type,
            entity_id = %entity.entity_id,
            action = action.as_str(),
            "performing enrichment action"
        );
        capabilities.perform(action, entity, config)?;
        performed += 1;
    }
    Ok(performed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingCapabilities;
    use crate::result::CapabilityError;
    use enrich_core::Action;
    use serde_json::json;

    fn doc() -> EntityDocument {
        EntityDocument::new("product", "42", "Product", json!({"name": "Chair"}))
    }

    #[test]
    fn runs_enabled_actions_in_order() {
        let caps = RecordingCapabilities::new();
        let plan = ActionPlan::none().with_cleanup().with_indexing().with_embedding();

        let n = execute_plan(&caps, &doc(), &EntityConfig::new("product"), &plan).unwrap();

        assert_eq!(n, 3);
        assert_eq!(
            caps.actions(),
            vec![Action::GenerateEmbedding, Action::IndexForSearch, Action::CleanupEmbeddings]
        );
    }

    #[test]
    fn failure_aborts_remaining_actions() {
        let caps = RecordingCapabilities::new();
        caps.fail_next(Action::IndexForSearch, CapabilityError::Provider("index down".into()));
        let plan = ActionPlan::none().with_embedding().with_indexing().with_analysis();

        let err = execute_plan(&caps, &doc(), &EntityConfig::new("product"), &plan).unwrap_err();

        assert_eq!(err, CapabilityError::Provider("index down".into()));
        assert_eq!(caps.actions(), vec![Action::GenerateEmbedding, Action::IndexForSearch]);
    }
}
