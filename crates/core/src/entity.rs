//! Entities that participate in enrichment.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// An entity whose mutations may trigger enrichment work.
///
/// The serialized form is the snapshot carried by deferred work; consumers
/// only ever see it as JSON.
pub trait EnrichableEntity: Serialize {
    /// Stable, serializable identity. `None` for entities not yet persisted.
    fn entity_id(&self) -> Option<String>;

    /// Class/kind tag recorded alongside the snapshot.
    fn kind(&self) -> &str;
}

/// Uniform, storage-independent view of an entity handed to capabilities.
///
/// Built from the live entity on the inline path and rebuilt from the queue
/// entry snapshot on the deferred path, so capabilities cannot tell the two
/// apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    pub entity_type: String,
    pub entity_id: String,
    pub kind: String,
    pub payload: JsonValue,
}

impl EntityDocument {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        kind: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// Snapshot a live entity.
    ///
    /// Returns `Ok(None)` when the entity has no id yet.
    pub fn capture<E: EnrichableEntity + ?Sized>(
        entity_type: &str,
        entity: &E,
    ) -> Result<Option<Self>, serde_json::Error> {
        let Some(entity_id) = entity.entity_id() else {
            return Ok(None);
        };
        let payload = serde_json::to_value(entity)?;
        Ok(Some(Self::new(entity_type, entity_id, entity.kind(), payload)))
    }

    /// Field of the snapshot rendered as text (strings unquoted).
    ///
    /// Missing fields and nulls yield `None`.
    pub fn field_text(&self, field: &str) -> Option<String> {
        match self.payload.get(field)? {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
