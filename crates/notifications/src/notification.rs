//! Notifications and the service that owns them.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hearth_core::{DomainError, DomainResult, EntityId, FamilyId};

/// A message delivered to family members' devices.
///
/// A sent notification cannot be unsent; compensation retracts it, which
/// marks it withdrawn and hides it from feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: EntityId,
    pub family_id: FamilyId,
    pub recipient: Option<String>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub retracted: bool,
}

/// In-memory notification state.
#[derive(Debug, Default)]
pub struct NotificationService {
    notifications: RwLock<HashMap<EntityId, Notification>>,
}

impl NotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(
        &self,
        family_id: FamilyId,
        recipient: Option<String>,
        body: impl Into<String>,
    ) -> DomainResult<Notification> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(DomainError::validation("notification body must not be empty"));
        }

        let notification = Notification {
            id: EntityId::new(),
            family_id,
            recipient,
            body,
            sent_at: Utc::now(),
            retracted: false,
        };

        let mut notifications = self
            .notifications
            .write()
            .map_err(|_| DomainError::invariant("notification state lock poisoned"))?;
        notifications.insert(notification.id, notification.clone());

        Ok(notification)
    }

    /// Withdraw a sent notification. Idempotent.
    pub fn retract(&self, family_id: FamilyId, id: EntityId) -> DomainResult<()> {
        let mut notifications = self
            .notifications
            .write()
            .map_err(|_| DomainError::invariant("notification state lock poisoned"))?;
        let notification = notifications
            .get_mut(&id)
            .filter(|notification| notification.family_id == family_id)
            .ok_or(DomainError::NotFound)?;
        notification.retracted = true;
        Ok(())
    }

    pub fn notification(&self, family_id: FamilyId, id: EntityId) -> DomainResult<Notification> {
        let notifications = self
            .notifications
            .read()
            .map_err(|_| DomainError::invariant("notification state lock poisoned"))?;
        notifications
            .get(&id)
            .filter(|notification| notification.family_id == family_id)
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    /// Notifications still showing in the family feed.
    pub fn visible_for_family(&self, family_id: FamilyId) -> DomainResult<Vec<Notification>> {
        let notifications = self
            .notifications
            .read()
            .map_err(|_| DomainError::invariant("notification state lock poisoned"))?;
        let mut found: Vec<_> = notifications
            .values()
            .filter(|notification| notification.family_id == family_id && !notification.retracted)
            .cloned()
            .collect();
        found.sort_by_key(|notification| notification.sent_at);
        Ok(found)
    }
}
