//! Action plans: the concrete enrichment work attached to a mutation.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// A single unit of enrichment work.
///
/// The declaration order is the execution order used for inline runs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    GenerateEmbedding,
    IndexForSearch,
    Analyze,
    RemoveFromSearch,
    CleanupEmbeddings,
}

impl Action {
    /// Fixed execution order.
    pub const ORDER: [Action; 5] = [
        Action::GenerateEmbedding,
        Action::IndexForSearch,
        Action::Analyze,
        Action::RemoveFromSearch,
        Action::CleanupEmbeddings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GenerateEmbedding => "generate_embedding",
            Action::IndexForSearch => "index_for_search",
            Action::Analyze => "analyze",
            Action::RemoveFromSearch => "remove_from_search",
            Action::CleanupEmbeddings => "cleanup_embeddings",
        }
    }
}

/// Five independent work flags.
///
/// A plan with every flag off carries no work; callers must short-circuit on
/// [`ActionPlan::requires_work`] before resolving strategies or touching the
/// queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPlan {
    pub generate_embedding: bool,
    pub index_for_search: bool,
    pub enable_analysis: bool,
    pub remove_from_search: bool,
    pub cleanup_embeddings: bool,
}

impl ActionPlan {
    /// A plan that does nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Default plan for an operation when nothing more specific is configured.
    ///
    /// - create/update: embed + index
    /// - delete: remove from search + cleanup embeddings
    pub fn default_for(operation: Operation) -> Self {
        match operation {
            Operation::Create | Operation::Update => Self::none().with_embedding().with_indexing(),
            Operation::Delete => Self::none().with_removal().with_cleanup(),
        }
    }

    pub fn with_embedding(mut self) -> Self {
        self.generate_embedding = true;
        self
    }

    pub fn with_indexing(mut self) -> Self {
        self.index_for_search = true;
        self
    }

    pub fn with_analysis(mut self) -> Self {
        self.enable_analysis = true;
        self
    }

    pub fn with_removal(mut self) -> Self {
        self.remove_from_search = true;
        self
    }

    pub fn with_cleanup(mut self) -> Self {
        self.cleanup_embeddings = true;
        self
    }

    pub fn requires_work(&self) -> bool {
        self.generate_embedding
            || self.index_for_search
            || self.enable_analysis
            || self.remove_from_search
            || self.cleanup_embeddings
    }

    pub fn includes(&self, action: Action) -> bool {
        match action {
            Action::GenerateEmbedding => self.generate_embedding,
            Action::IndexForSearch => self.index_for_search,
            Action::Analyze => self.enable_analysis,
            Action::RemoveFromSearch => self.remove_from_search,
            Action::CleanupEmbeddings => self.cleanup_embeddings,
        }
    }

    /// The enabled actions, in execution order.
    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        Action::ORDER.into_iter().filter(move |a| self.includes(*a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn plan_from(flags: [bool; 5]) -> ActionPlan {
        ActionPlan {
            generate_embedding: flags[0],
            index_for_search: flags[1],
            enable_analysis: flags[2],
            remove_from_search: flags[3],
            cleanup_embeddings: flags[4],
        }
    }

    #[test]
    fn empty_plan_has_no_work() {
        assert!(!ActionPlan::none().requires_work());
        assert_eq!(ActionPlan::none().actions().count(), 0);
    }

    #[test]
    fn actions_follow_fixed_order() {
        let plan = ActionPlan::none().with_cleanup().with_embedding().with_analysis();
        let actions: Vec<_> = plan.actions().collect();
        assert_eq!(
            actions,
            vec![Action::GenerateEmbedding, Action::Analyze, Action::CleanupEmbeddings]
        );
    }

    #[test]
    fn delete_defaults_to_removal_work() {
        let plan = ActionPlan::default_for(Operation::Delete);
        assert!(plan.remove_from_search && plan.cleanup_embeddings);
        assert!(!plan.generate_embedding && !plan.index_for_search);
    }

    #[test]
    fn missing_fields_deserialize_as_false() {
        let plan: ActionPlan = serde_json::from_str(r#"{"index_for_search": true}"#).unwrap();
        assert_eq!(plan, ActionPlan::none().with_indexing());
    }

    proptest! {
        #[test]
        fn requires_work_iff_any_flag_set(flags in proptest::array::uniform5(any::<bool>())) {
            let plan = plan_from(flags);
            prop_assert_eq!(plan.requires_work(), flags.iter().any(|f| *f));
            prop_assert_eq!(plan.actions().count(), flags.iter().filter(|f| **f).count());
        }
    }
}
