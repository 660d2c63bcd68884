//! Outbox storage: modules stage events, the publisher drains them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use hearth_events::{DomainEvent, OutboxEntry, OutboxError, OutboxStatus, OutboxWriter};

use super::StoreError;

/// Consumer-side outbox contract.
pub trait OutboxStore: Send + Sync {
    /// Entries due for publication at `now`, oldest first. Entries are not
    /// leased; run one publisher per store. A crash between publish and
    /// mark is redelivered, which is the at-least-once contract consumers
    /// already dedup against.
    fn claim_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Record a successful publication.
    fn mark_published(&self, entry_id: Uuid) -> Result<(), StoreError>;

    /// Record a failed attempt; the entry becomes due again at `retry_at`.
    fn mark_failed(
        &self,
        entry_id: Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Park an entry whose publish attempts are exhausted.
    fn dead_letter(&self, entry_id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Parked entries, oldest first.
    fn dead_letters(&self) -> Result<Vec<OutboxEntry>, StoreError>;
}

/// In-memory outbox for tests/dev. Serves both sides of the contract: the
/// producer half ([`OutboxWriter`]) and the consumer half ([`OutboxStore`]).
#[derive(Debug)]
pub struct InMemoryOutbox {
    entries: RwLock<HashMap<Uuid, OutboxEntry>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryOutbox {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxWriter for InMemoryOutbox {
    fn enqueue(&self, event: DomainEvent) -> Result<Uuid, OutboxError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| OutboxError::Storage("outbox lock poisoned".to_string()))?;

        let entry = OutboxEntry::new(event);
        let id = entry.id;
        entries.insert(id, entry);
        Ok(id)
    }
}

impl OutboxStore for InMemoryOutbox {
    fn claim_batch(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::poisoned())?;
        let mut due: Vec<_> = entries
            .values()
            .filter(|entry| entry.is_due(now))
            .cloned()
            .collect();

        due.sort_by_key(|entry| (entry.created_at, entry.id));
        due.truncate(limit);
        Ok(due)
    }

    fn mark_published(&self, entry_id: Uuid) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::poisoned())?;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        entry.mark_published(Utc::now());
        Ok(())
    }

    fn mark_failed(
        &self,
        entry_id: Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::poisoned())?;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        entry.mark_failed(error, retry_at);
        Ok(())
    }

    fn dead_letter(&self, entry_id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::poisoned())?;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))?;
        entry.mark_dead_lettered(error);
        Ok(())
    }

    fn dead_letters(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::poisoned())?;
        let mut parked: Vec<_> = entries
            .values()
            .filter(|entry| entry.status == OutboxStatus::DeadLettered)
            .cloned()
            .collect();

        parked.sort_by_key(|entry| entry.created_at);
        Ok(parked)
    }
}
