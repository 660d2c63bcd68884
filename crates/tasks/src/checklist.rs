//! Checklists and the service that owns them.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use hearth_core::{DomainError, DomainResult, EntityId, FamilyId};
use hearth_events::DomainEvent;

/// Event type raised when every item of a checklist is ticked off.
pub const EVENT_COMPLETED: &str = "tasks.checklist.completed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    pub done: bool,
}

/// A list of things to do, owned by one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checklist {
    pub id: EntityId,
    pub family_id: FamilyId,
    pub title: String,
    pub items: Vec<ChecklistItem>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checklist {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// In-memory checklist state.
#[derive(Debug, Default)]
pub struct TaskService {
    checklists: RwLock<HashMap<EntityId, Checklist>>,
}

impl TaskService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_checklist(
        &self,
        family_id: FamilyId,
        title: impl Into<String>,
        items: Vec<String>,
        assignee: Option<String>,
    ) -> DomainResult<Checklist> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::validation("checklist title must not be empty"));
        }

        let checklist = Checklist {
            id: EntityId::new(),
            family_id,
            title,
            items: items
                .into_iter()
                .map(|text| ChecklistItem { text, done: false })
                .collect(),
            assignee,
            created_at: Utc::now(),
            completed_at: None,
        };

        let mut checklists = self
            .checklists
            .write()
            .map_err(|_| DomainError::invariant("task state lock poisoned"))?;
        checklists.insert(checklist.id, checklist.clone());

        Ok(checklist)
    }

    /// Tick an item off. Finishing the last open item completes the
    /// checklist and returns the completion event to stage.
    pub fn finish_item(
        &self,
        family_id: FamilyId,
        id: EntityId,
        item_index: usize,
    ) -> DomainResult<Option<DomainEvent>> {
        let mut checklists = self
            .checklists
            .write()
            .map_err(|_| DomainError::invariant("task state lock poisoned"))?;
        let checklist = checklists
            .get_mut(&id)
            .filter(|checklist| checklist.family_id == family_id)
            .ok_or(DomainError::NotFound)?;

        let item = checklist
            .items
            .get_mut(item_index)
            .ok_or_else(|| DomainError::validation(format!("no checklist item {item_index}")))?;
        item.done = true;

        if checklist.completed_at.is_none() && checklist.items.iter().all(|item| item.done) {
            checklist.completed_at = Some(Utc::now());
            let event = DomainEvent::record(
                family_id,
                EVENT_COMPLETED,
                "checklist",
                checklist.id,
                json!({
                    "checklist_id": checklist.id,
                    "title": checklist.title,
                    "item_count": checklist.items.len(),
                    "assignee": checklist.assignee,
                }),
            );
            return Ok(Some(event));
        }

        Ok(None)
    }

    pub fn checklist(&self, family_id: FamilyId, id: EntityId) -> DomainResult<Checklist> {
        let checklists = self
            .checklists
            .read()
            .map_err(|_| DomainError::invariant("task state lock poisoned"))?;
        checklists
            .get(&id)
            .filter(|checklist| checklist.family_id == family_id)
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    /// Remove a checklist outright (compensation path).
    pub fn remove_checklist(&self, family_id: FamilyId, id: EntityId) -> DomainResult<()> {
        let mut checklists = self
            .checklists
            .write()
            .map_err(|_| DomainError::invariant("task state lock poisoned"))?;
        match checklists.get(&id) {
            Some(checklist) if checklist.family_id == family_id => {
                checklists.remove(&id);
                Ok(())
            }
            _ => Err(DomainError::NotFound),
        }
    }

    pub fn checklists_for_family(&self, family_id: FamilyId) -> DomainResult<Vec<Checklist>> {
        let checklists = self
            .checklists
            .read()
            .map_err(|_| DomainError::invariant("task state lock poisoned"))?;
        let mut found: Vec<_> = checklists
            .values()
            .filter(|checklist| checklist.family_id == family_id)
            .cloned()
            .collect();
        found.sort_by_key(|checklist| checklist.created_at);
        Ok(found)
    }
}
