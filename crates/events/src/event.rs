use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hearth_core::{EntityId, FamilyId};

/// A domain event raised by a feature module, carrying family + origin metadata.
///
/// This is the unit feature modules hand to the transactional outbox and the
/// unit the chain engine consumes as a trigger.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `family_id`.
/// - `event_id` doubles as the engine's correlation/deduplication key, so it
///   must be stable across redeliveries of the same event.
/// - `payload` is a free-form JSON document; its shape is owned by the
///   emitting module and documented next to the trigger registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: Uuid,
    family_id: FamilyId,

    /// Dotted `module.entity.happening` name, e.g. `calendar.event.created`.
    event_type: String,

    entity_type: String,
    entity_id: EntityId,

    payload: JsonValue,
    occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(
        event_id: Uuid,
        family_id: FamilyId,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: EntityId,
        payload: JsonValue,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id,
            family_id,
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id,
            payload,
            occurred_at,
        }
    }

    /// Record a fresh event happening now, with a new time-ordered id.
    pub fn record(
        family_id: FamilyId,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: EntityId,
        payload: JsonValue,
    ) -> Self {
        Self::new(
            Uuid::now_v7(),
            family_id,
            event_type,
            entity_type,
            entity_id,
            payload,
            Utc::now(),
        )
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn into_payload(self) -> JsonValue {
        self.payload
    }
}
