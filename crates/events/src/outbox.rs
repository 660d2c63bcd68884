//! Transactional outbox contract (producer side).
//!
//! Feature modules stage events here in the same transaction as the state
//! change that produced them; a consumer loop publishes staged entries to the
//! bus afterwards. Publication is at-least-once, so everything downstream
//! deduplicates on `event_id`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::DomainEvent;

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Waiting to be published (or waiting out a retry backoff).
    Pending,
    /// Published to the bus.
    Published,
    /// Exhausted its publish attempts; kept for inspection.
    DeadLettered,
}

/// A domain event staged for publication, plus delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub event: DomainEvent,
    pub status: OutboxStatus,
    /// Publish attempts made so far.
    pub attempts: u32,
    /// The entry is not eligible for publication before this instant.
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEntry {
    pub fn new(event: DomainEvent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            event,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            published_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }

    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Published;
        self.attempts += 1;
        self.published_at = Some(now);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, retry_at: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.next_attempt_at = retry_at;
    }

    pub fn mark_dead_lettered(&mut self, error: impl Into<String>) {
        self.status = OutboxStatus::DeadLettered;
        self.attempts += 1;
        self.last_error = Some(error.into());
    }
}

/// Error raised by outbox writers.
#[derive(Debug, Clone, Error)]
pub enum OutboxError {
    #[error("outbox storage error: {0}")]
    Storage(String),
}

/// Producer-side contract: stage an event for later publication.
pub trait OutboxWriter: Send + Sync {
    fn enqueue(&self, event: DomainEvent) -> Result<Uuid, OutboxError>;
}

impl<W> OutboxWriter for Arc<W>
where
    W: OutboxWriter + ?Sized,
{
    fn enqueue(&self, event: DomainEvent) -> Result<Uuid, OutboxError> {
        (**self).enqueue(event)
    }
}
