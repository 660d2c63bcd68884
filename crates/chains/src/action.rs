//! The contract between the chain engine and feature-module actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use hearth_core::{EntityId, FamilyId};

use crate::id::{ChainDefinitionId, ChainExecutionId};
use crate::ledger::EntityMapping;

/// Everything a handler may read while executing a step.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub family_id: FamilyId,
    pub execution_id: ChainExecutionId,
    /// The trigger event id; stable across redeliveries of the same event.
    /// Handlers needing idempotency of their own key on this plus the step
    /// index.
    pub correlation_id: Uuid,
    pub step_index: u32,
    /// Fully resolved input (no placeholders left).
    pub input: JsonValue,
}

/// An entity a handler created, destined for the mapping ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub entity_type: String,
    pub entity_id: EntityId,
    pub module: String,
}

impl CreatedEntity {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: EntityId,
        module: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            module: module.into(),
        }
    }
}

/// A delayed continuation a handler asks the engine to schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub fire_at: DateTime<Utc>,
    /// Event type of the synthetic trigger emitted when the job fires.
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub payload: JsonValue,
    /// When set, only this definition is considered when the job fires.
    pub only_definition: Option<ChainDefinitionId>,
    /// When set, each firing enqueues the next occurrence.
    pub recur_every: Option<std::time::Duration>,
}

impl ScheduleRequest {
    pub fn new(
        fire_at: DateTime<Utc>,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: EntityId,
        payload: JsonValue,
    ) -> Self {
        Self {
            fire_at,
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id,
            payload,
            only_definition: None,
            recur_every: None,
        }
    }

    pub fn for_definition(mut self, definition_id: ChainDefinitionId) -> Self {
        self.only_definition = Some(definition_id);
        self
    }

    pub fn recurring(mut self, every: std::time::Duration) -> Self {
        self.recur_every = Some(every);
        self
    }
}

/// Successful step outcome.
#[derive(Debug, Clone, Default)]
pub struct ActionSuccess {
    /// Recorded on the step and addressable by later steps' templates.
    pub output: Option<JsonValue>,
    pub created_entities: Vec<CreatedEntity>,
    pub scheduled_jobs: Vec<ScheduleRequest>,
}

impl ActionSuccess {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_output(output: JsonValue) -> Self {
        Self {
            output: Some(output),
            ..Self::default()
        }
    }

    pub fn and_entity(mut self, entity: CreatedEntity) -> Self {
        self.created_entities.push(entity);
        self
    }

    pub fn and_schedule(mut self, request: ScheduleRequest) -> Self {
        self.scheduled_jobs.push(request);
        self
    }
}

/// Why a step did not succeed.
///
/// `Retryable` consumes the step's retry budget before counting as failed;
/// `Fatal` fails the step immediately.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionFailure {
    #[error("{0}")]
    Fatal(String),

    #[error("{0}")]
    Retryable(String),
}

impl ActionFailure {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Fatal(msg) | Self::Retryable(msg) => msg,
        }
    }
}

/// Everything a handler may read while undoing a previously-succeeded step.
#[derive(Debug, Clone)]
pub struct CompensationContext {
    pub family_id: FamilyId,
    pub execution_id: ChainExecutionId,
    pub correlation_id: Uuid,
    pub step_index: u32,
    /// The input the execute call received.
    pub input: JsonValue,
    /// The output the execute call produced, if any.
    pub output: Option<JsonValue>,
    /// Ledger rows this step produced.
    pub created_entities: Vec<EntityMapping>,
}

/// Compensation did not complete; the execution ends `CompensationFailed`
/// and is surfaced for manual repair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompensationFailure {
    pub message: String,
}

impl CompensationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One registered version of an action.
///
/// `execute` must be effectively idempotent per `(correlation_id, step_index)`:
/// the engine may re-invoke a step whose previous attempt was interrupted
/// before its outcome was recorded.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure>;

    /// Undo a succeeded `execute`. The default succeeds without doing
    /// anything, for actions with no lasting side effects.
    fn compensate(&self, _ctx: &CompensationContext) -> Result<(), CompensationFailure> {
        Ok(())
    }
}
