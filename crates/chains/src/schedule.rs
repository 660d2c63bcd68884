//! Delayed and recurring triggers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use hearth_core::{EntityId, FamilyId};

use crate::action::ScheduleRequest;
use crate::id::{ChainDefinitionId, ScheduledJobId};

/// Scheduler-side status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJobStatus {
    Pending,
    Fired,
    Cancelled,
}

impl ScheduledJobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The event a job synthesizes when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticTrigger {
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub payload: JsonValue,
}

/// A durable timer: at `fire_at`, synthesize the trigger and run matching.
///
/// The job id becomes the synthetic event's id. A job that fires twice
/// (crash between claim and dispatch) therefore still creates at most one
/// execution per definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: ScheduledJobId,
    pub family_id: FamilyId,
    pub fire_at: DateTime<Utc>,
    pub status: ScheduledJobStatus,
    pub trigger: SyntheticTrigger,
    /// When set, matching considers only this definition.
    pub only_definition: Option<ChainDefinitionId>,
    /// When set, each firing enqueues the next occurrence.
    pub recur_every: Option<Duration>,
    pub created_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(family_id: FamilyId, fire_at: DateTime<Utc>, trigger: SyntheticTrigger) -> Self {
        Self {
            id: ScheduledJobId::new(),
            family_id,
            fire_at,
            status: ScheduledJobStatus::Pending,
            trigger,
            only_definition: None,
            recur_every: None,
            created_at: Utc::now(),
            fired_at: None,
        }
    }

    pub fn for_definition(mut self, definition_id: ChainDefinitionId) -> Self {
        self.only_definition = Some(definition_id);
        self
    }

    pub fn recurring(mut self, every: Duration) -> Self {
        self.recur_every = Some(every);
        self
    }

    /// Build the job a step's [`ScheduleRequest`] asked for.
    pub fn from_request(family_id: FamilyId, request: &ScheduleRequest) -> Self {
        let mut job = Self::new(
            family_id,
            request.fire_at,
            SyntheticTrigger {
                event_type: request.event_type.clone(),
                entity_type: request.entity_type.clone(),
                entity_id: request.entity_id,
                payload: request.payload.clone(),
            },
        );
        job.only_definition = request.only_definition;
        job.recur_every = request.recur_every;
        job
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledJobStatus::Pending && self.fire_at <= now
    }

    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.status = ScheduledJobStatus::Fired;
        self.fired_at = Some(now);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ScheduledJobStatus::Cancelled;
    }

    /// The follow-up occurrence of a recurring job: fresh id, same trigger,
    /// cadence anchored to `fire_at`. Occurrences that would land in the past
    /// (the scheduler was down across several periods) are skipped rather
    /// than replayed as a burst.
    pub fn next_occurrence(&self, now: DateTime<Utc>) -> Option<ScheduledJob> {
        let every = self.recur_every?;
        let period = chrono::Duration::from_std(every).ok()?;
        if period <= chrono::Duration::zero() {
            return None;
        }

        let mut fire_at = self.fire_at + period;
        while fire_at <= now {
            fire_at += period;
        }

        let mut next = self.clone();
        next.id = ScheduledJobId::new();
        next.status = ScheduledJobStatus::Pending;
        next.fire_at = fire_at;
        next.created_at = now;
        next.fired_at = None;
        Some(next)
    }
}
