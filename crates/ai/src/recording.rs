//! In-memory capability implementation for tests/dev.
//!
//! Records every call it receives and can be scripted to fail.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use enrich_core::{Action, EntityDocument};

use crate::capability::EnrichmentCapabilities;
use crate::config::EntityConfig;
use crate::result::{CapabilityError, CapabilityResult};

/// One observed capability invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCall {
    pub action: Action,
    pub entity_type: String,
    pub entity_id: String,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<CapabilityCall>,
    /// Pending scripted failures: (error, remaining count) per action.
    failures: HashMap<Action, (CapabilityError, u32)>,
}

#[derive(Debug, Default)]
pub struct RecordingCapabilities {
    inner: Mutex<Inner>,
}

impl RecordingCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` invocations of `action` with `error`.
    pub fn fail_times(&self, action: Action, error: CapabilityError, times: u32) {
        let mut inner = self.lock();
        if times == 0 {
            inner.failures.remove(&action);
        } else {
            inner.failures.insert(action, (error, times));
        }
    }

    pub fn fail_next(&self, action: Action, error: CapabilityError) {
        self.fail_times(action, error, 1);
    }

    pub fn calls(&self) -> Vec<CapabilityCall> {
        self.lock().calls.clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().calls.iter().map(|c| c.action).collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, action: Action, entity: &EntityDocument) -> CapabilityResult<()> {
        let mut inner = self.lock();
        inner.calls.push(CapabilityCall {
            action,
            entity_type: entity.entity_type.clone(),
            entity_id: entity.entity_id.clone(),
        });

        let Some((error, remaining)) = inner.failures.get_mut(&action) else {
            return Ok(());
        };
        let error = error.clone();
        *remaining -= 1;
        if *remaining == 0 {
            inner.failures.remove(&action);
        }
        Err(error)
    }
}

impl EnrichmentCapabilities for RecordingCapabilities {
    fn generate_embeddings(&self, entity: &EntityDocument, _config: &EntityConfig) -> CapabilityResult<()> {
        self.record(Action::GenerateEmbedding, entity)
    }

    fn index_for_search(&self, entity: &EntityDocument, _config: &EntityConfig) -> CapabilityResult<()> {
        self.record(Action::IndexForSearch, entity)
    }

    fn analyze_entity(&self, entity: &EntityDocument, _config: &EntityConfig) -> CapabilityResult<()> {
        self.record(Action::Analyze, entity)
    }

    fn remove_from_search(&self, entity: &EntityDocument, _config: &EntityConfig) -> CapabilityResult<()> {
        self.record(Action::RemoveFromSearch, entity)
    }

    fn cleanup_embeddings(&self, entity: &EntityDocument, _config: &EntityConfig) -> CapabilityResult<()> {
        self.record(Action::CleanupEmbeddings, entity)
    }
}
