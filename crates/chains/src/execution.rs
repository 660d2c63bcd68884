//! Execution records: one run of a definition against one trigger event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hearth_core::{DomainError, DomainResult, FamilyId};

use crate::id::{ChainDefinitionId, ChainExecutionId};

/// Lifecycle of a whole execution.
///
/// ```text
/// Pending ──► Running ──► Succeeded
///                │
///                ▼
///          Compensating ──► Failed
///                │
///                ▼
///        CompensationFailed
/// ```
///
/// Terminal states are immutable; the store rejects updates to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Compensating,
    Succeeded,
    Failed,
    CompensationFailed,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::CompensationFailed)
    }
}

/// Lifecycle of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Compensated,
    CompensationFailed,
}

impl StepState {
    /// Forward progress is settled; the orchestrator may move past the step.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

/// The first failure recorded on an execution: which step, what happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionErrorSummary {
    pub step_index: u32,
    pub message: String,
}

/// One run of one definition for one trigger event.
///
/// `(definition_id, correlation_id)` is unique: redelivering the trigger
/// event cannot create a second execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainExecution {
    id: ChainExecutionId,
    definition_id: ChainDefinitionId,
    family_id: FamilyId,
    /// The trigger event's id.
    correlation_id: Uuid,
    trigger_event_type: String,
    /// Snapshot of the trigger payload; templates resolve against this, not
    /// against whatever the source entity looks like later.
    trigger_payload: JsonValue,
    state: ExecutionState,
    first_error: Option<ExecutionErrorSummary>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ChainExecution {
    pub fn new(
        definition_id: ChainDefinitionId,
        family_id: FamilyId,
        correlation_id: Uuid,
        trigger_event_type: impl Into<String>,
        trigger_payload: JsonValue,
    ) -> Self {
        Self {
            id: ChainExecutionId::new(),
            definition_id,
            family_id,
            correlation_id,
            trigger_event_type: trigger_event_type.into(),
            trigger_payload,
            state: ExecutionState::Pending,
            first_error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> ChainExecutionId {
        self.id
    }

    pub fn definition_id(&self) -> ChainDefinitionId {
        self.definition_id
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn trigger_event_type(&self) -> &str {
        &self.trigger_event_type
    }

    pub fn trigger_payload(&self) -> &JsonValue {
        &self.trigger_payload
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn first_error(&self) -> Option<&ExecutionErrorSummary> {
        self.first_error.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Pending → Running.
    pub fn begin(&mut self) -> DomainResult<()> {
        self.transition(ExecutionState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running → Compensating. Entered on any aborting step failure, even
    /// when no prior step succeeded; an empty compensation pass is fine.
    pub fn begin_compensation(&mut self) -> DomainResult<()> {
        self.transition(ExecutionState::Compensating)
    }

    /// Running → Succeeded.
    pub fn complete(&mut self) -> DomainResult<()> {
        self.transition(ExecutionState::Succeeded)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Compensating → Failed (every applied step was compensated).
    pub fn fail(&mut self) -> DomainResult<()> {
        self.transition(ExecutionState::Failed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Compensating → CompensationFailed (manual repair required).
    pub fn fail_compensation(&mut self) -> DomainResult<()> {
        self.transition(ExecutionState::CompensationFailed)?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Keep only the first failure; later ones are visible on their steps.
    pub fn record_first_error(&mut self, step_index: u32, message: impl Into<String>) {
        if self.first_error.is_none() {
            self.first_error = Some(ExecutionErrorSummary {
                step_index,
                message: message.into(),
            });
        }
    }

    fn transition(&mut self, to: ExecutionState) -> DomainResult<()> {
        use ExecutionState::*;
        let legal = matches!(
            (self.state, to),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, Compensating)
                | (Compensating, Failed)
                | (Compensating, CompensationFailed)
        );
        if !legal {
            return Err(DomainError::invariant(format!(
                "illegal execution transition {:?} -> {to:?}",
                self.state
            )));
        }
        self.state = to;
        Ok(())
    }
}

/// Persisted record of one step invocation within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub execution_id: ChainExecutionId,
    pub step_index: u32,
    pub state: StepState,
    /// Fully resolved input handed to the handler; `null` when input mapping
    /// itself failed.
    pub input: JsonValue,
    pub output: Option<JsonValue>,
    pub error: Option<String>,
    /// Invocation attempts consumed, retries included.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(execution_id: ChainExecutionId, step_index: u32, input: JsonValue) -> Self {
        Self {
            execution_id,
            step_index,
            state: StepState::Pending,
            input,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = StepState::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    pub fn mark_succeeded(&mut self, output: Option<JsonValue>) {
        self.state = StepState::Succeeded;
        self.output = output;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = StepState::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_compensated(&mut self) {
        self.state = StepState::Compensated;
    }

    pub fn mark_compensation_failed(&mut self, error: impl Into<String>) {
        self.state = StepState::CompensationFailed;
        self.error = Some(error.into());
    }
}
