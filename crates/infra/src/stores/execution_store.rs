//! Execution and step-record storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use hearth_chains::{ChainDefinitionId, ChainExecution, ChainExecutionId, StepExecution};
use hearth_core::FamilyId;

use super::StoreError;

/// Outcome of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was written.
    Created,
    /// An equivalent record already existed; nothing was written.
    Duplicate,
}

/// Execution store abstraction.
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution unless one already exists for the same
    /// `(definition_id, correlation_id)`. The duplicate case is how
    /// redelivered trigger events collapse into a single execution.
    fn insert_new(&self, execution: ChainExecution) -> Result<InsertOutcome, StoreError>;

    /// Persist a progressed execution. Terminal records are immutable.
    fn update(&self, execution: &ChainExecution) -> Result<(), StoreError>;

    /// Get an execution by ID.
    fn get(
        &self,
        family_id: FamilyId,
        execution_id: ChainExecutionId,
    ) -> Result<Option<ChainExecution>, StoreError>;

    /// A definition's executions, oldest first.
    fn list_for_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<Vec<ChainExecution>, StoreError>;

    /// Executions that have not reached a terminal state, across families,
    /// oldest first. Recovery resumes these on startup.
    fn non_terminal(&self) -> Result<Vec<ChainExecution>, StoreError>;

    /// Insert or replace a step record.
    fn upsert_step(&self, step: StepExecution) -> Result<(), StoreError>;

    /// All step records of an execution, ordered by step index. Family scope
    /// is established by the execution lookup that produced the ID.
    fn steps_for_execution(
        &self,
        execution_id: ChainExecutionId,
    ) -> Result<Vec<StepExecution>, StoreError>;
}

/// In-memory execution store for tests/dev.
#[derive(Debug)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<ChainExecutionId, ChainExecution>>,
    /// Idempotency index over `(definition_id, correlation_id)`.
    dedup: RwLock<HashMap<(ChainDefinitionId, Uuid), ChainExecutionId>>,
    steps: RwLock<HashMap<(ChainExecutionId, u32), StepExecution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            dedup: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn insert_new(&self, execution: ChainExecution) -> Result<InsertOutcome, StoreError> {
        let mut executions = self.executions.write().map_err(|_| StoreError::poisoned())?;
        let mut dedup = self.dedup.write().map_err(|_| StoreError::poisoned())?;

        let key = (execution.definition_id(), execution.correlation_id());
        if dedup.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }

        dedup.insert(key, execution.id());
        executions.insert(execution.id(), execution);
        Ok(InsertOutcome::Created)
    }

    fn update(&self, execution: &ChainExecution) -> Result<(), StoreError> {
        let mut executions = self.executions.write().map_err(|_| StoreError::poisoned())?;
        match executions.get(&execution.id()) {
            Some(stored) if stored.state().is_terminal() => {
                Err(StoreError::Terminal(execution.id().to_string()))
            }
            Some(_) => {
                executions.insert(execution.id(), execution.clone());
                Ok(())
            }
            None => Err(StoreError::NotFound(execution.id().to_string())),
        }
    }

    fn get(
        &self,
        family_id: FamilyId,
        execution_id: ChainExecutionId,
    ) -> Result<Option<ChainExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::poisoned())?;
        match executions.get(&execution_id) {
            Some(execution) if execution.family_id() == family_id => Ok(Some(execution.clone())),
            Some(_) => Err(StoreError::FamilyIsolation),
            None => Ok(None),
        }
    }

    fn list_for_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<Vec<ChainExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = executions
            .values()
            .filter(|e| e.family_id() == family_id && e.definition_id() == definition_id)
            .cloned()
            .collect();

        result.sort_by_key(|e| e.created_at());
        Ok(result)
    }

    fn non_terminal(&self) -> Result<Vec<ChainExecution>, StoreError> {
        let executions = self.executions.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = executions
            .values()
            .filter(|e| !e.state().is_terminal())
            .cloned()
            .collect();

        result.sort_by_key(|e| e.created_at());
        Ok(result)
    }

    fn upsert_step(&self, step: StepExecution) -> Result<(), StoreError> {
        let mut steps = self.steps.write().map_err(|_| StoreError::poisoned())?;
        steps.insert((step.execution_id, step.step_index), step);
        Ok(())
    }

    fn steps_for_execution(
        &self,
        execution_id: ChainExecutionId,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let steps = self.steps.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = steps
            .values()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();

        result.sort_by_key(|s| s.step_index);
        Ok(result)
    }
}
