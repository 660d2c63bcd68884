//! Calendar entries and the service that owns them.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use hearth_core::{DomainError, DomainResult, EntityId, FamilyId};
use hearth_events::DomainEvent;

/// Event type raised when an entry is created.
pub const EVENT_CREATED: &str = "calendar.event.created";
/// Event type synthesized when a scheduled reminder fires.
pub const EVENT_REMINDER_DUE: &str = "calendar.reminder.due";

/// One entry on the family calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: EntityId,
    pub family_id: FamilyId,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory calendar state.
///
/// Mutating operations return the [`DomainEvent`] describing what happened;
/// the caller stages it through the outbox together with its own writes.
#[derive(Debug, Default)]
pub struct CalendarService {
    entries: RwLock<HashMap<EntityId, CalendarEntry>>,
}

impl CalendarService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_entry(
        &self,
        family_id: FamilyId,
        title: impl Into<String>,
        starts_at: DateTime<Utc>,
        location: Option<String>,
    ) -> DomainResult<(CalendarEntry, DomainEvent)> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::validation("calendar entry title must not be empty"));
        }

        let entry = CalendarEntry {
            id: EntityId::new(),
            family_id,
            title,
            starts_at,
            location,
            created_at: Utc::now(),
        };

        let mut entries = self
            .entries
            .write()
            .map_err(|_| DomainError::invariant("calendar state lock poisoned"))?;
        entries.insert(entry.id, entry.clone());

        let event = DomainEvent::record(
            family_id,
            EVENT_CREATED,
            "calendar_event",
            entry.id,
            json!({
                "entry_id": entry.id,
                "title": entry.title,
                "starts_at": entry.starts_at,
                "location": entry.location,
            }),
        );

        Ok((entry, event))
    }

    pub fn entry(&self, family_id: FamilyId, id: EntityId) -> DomainResult<CalendarEntry> {
        let entries = self
            .entries
            .read()
            .map_err(|_| DomainError::invariant("calendar state lock poisoned"))?;
        entries
            .get(&id)
            .filter(|entry| entry.family_id == family_id)
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    /// Remove an entry outright. Used by compensation to take back a created
    /// entry as if it never existed.
    pub fn remove_entry(&self, family_id: FamilyId, id: EntityId) -> DomainResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| DomainError::invariant("calendar state lock poisoned"))?;
        match entries.get(&id) {
            Some(entry) if entry.family_id == family_id => {
                entries.remove(&id);
                Ok(())
            }
            _ => Err(DomainError::NotFound),
        }
    }

    pub fn entries_for_family(&self, family_id: FamilyId) -> DomainResult<Vec<CalendarEntry>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| DomainError::invariant("calendar state lock poisoned"))?;
        let mut found: Vec<_> = entries
            .values()
            .filter(|entry| entry.family_id == family_id)
            .cloned()
            .collect();
        found.sort_by_key(|entry| entry.created_at);
        Ok(found)
    }
}
