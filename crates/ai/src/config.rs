//! Per-entity-type capability configuration.
//!
//! This is what providers need to know about an entity type: which fields
//! feed embeddings, which feed the search index, and which plan each CRUD
//! operation carries by default.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use enrich_core::{ActionPlan, EntityDocument, Operation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    pub entity_type: String,
    /// Fields concatenated into the search index text.
    pub searchable_fields: Vec<String>,
    /// Fields concatenated into the embedding input.
    pub embeddable_fields: Vec<String>,
    /// Fields copied verbatim into index metadata.
    pub metadata_fields: Vec<String>,
    pub auto_embedding: bool,
    pub indexable: bool,
    /// Per-operation plans; operations without an entry use [`ActionPlan::default_for`].
    pub crud_operations: HashMap<Operation, ActionPlan>,
}

impl EntityConfig {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            searchable_fields: Vec::new(),
            embeddable_fields: Vec::new(),
            metadata_fields: Vec::new(),
            auto_embedding: true,
            indexable: true,
            crud_operations: HashMap::new(),
        }
    }

    pub fn searchable(mut self, fields: &[&str]) -> Self {
        self.searchable_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn embeddable(mut self, fields: &[&str]) -> Self {
        self.embeddable_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn metadata(mut self, fields: &[&str]) -> Self {
        self.metadata_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_plan(mut self, operation: Operation, plan: ActionPlan) -> Self {
        self.crud_operations.insert(operation, plan);
        self
    }

    /// Plan a lifecycle hook should submit for `operation`.
    pub fn action_plan(&self, operation: Operation) -> ActionPlan {
        self.crud_operations
            .get(&operation)
            .copied()
            .unwrap_or_else(|| ActionPlan::default_for(operation))
    }

    /// Searchable fields of `entity`, space-joined; blanks skipped.
    pub fn searchable_text(&self, entity: &EntityDocument) -> String {
        join_fields(entity, &self.searchable_fields)
    }

    /// Embeddable fields of `entity`, space-joined; blanks skipped.
    pub fn embeddable_text(&self, entity: &EntityDocument) -> String {
        join_fields(entity, &self.embeddable_fields)
    }

    pub fn extract_metadata(&self, entity: &EntityDocument) -> Map<String, JsonValue> {
        self.metadata_fields
            .iter()
            .filter_map(|f| entity.payload.get(f).map(|v| (f.clone(), v.clone())))
            .collect()
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self::new("")
    }
}

fn join_fields(entity: &EntityDocument, fields: &[String]) -> String {
    fields
        .iter()
        .filter_map(|f| entity.field_text(f))
        .filter(|v| !v.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Read-only map from entity type to [`EntityConfig`], built at startup.
#[derive(Debug, Clone, Default)]
pub struct EntityConfigRegistry {
    configs: HashMap<String, EntityConfig>,
}

impl EntityConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: EntityConfig) -> &mut Self {
        self.configs.insert(config.entity_type.clone(), config);
        self
    }

    pub fn with(mut self, config: EntityConfig) -> Self {
        self.register(config);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&EntityConfig> {
        self.configs.get(entity_type)
    }

    /// Registered config, or a default one for unknown types.
    pub fn resolve(&self, entity_type: &str) -> Cow<'_, EntityConfig> {
        match self.configs.get(entity_type) {
            Some(config) => Cow::Borrowed(config),
            None => {
                tracing::debug!(entity_type, "no entity config registered; using defaults");
                Cow::Owned(EntityConfig::new(entity_type))
            }
        }
    }

    /// Parse a JSON array of entity configs.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let configs: Vec<EntityConfig> = serde_json::from_str(json)?;
        Ok(configs.into_iter().fold(Self::new(), |registry, c| registry.with(c)))
    }
}
