//! Family-facing operations: definition management, execution history,
//! scheduled jobs. The service runs no chains itself; workers own that.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use hearth_chains::{
    ActionDescriptor, ChainDefinition, ChainDefinitionId, ChainExecution, ChainExecutionId,
    ChainRegistry, ChainStep, DefinitionError, EntityMapping, ScheduleRequest, ScheduledJob,
    ScheduledJobId, StepExecution, TriggerDescriptor, definition,
};
use hearth_core::FamilyId;

use crate::stores::{DefinitionStore, ExecutionStore, LedgerStore, ScheduledJobStore, StoreError};

/// Service-level error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Validation(String),
}

/// Everything recorded about one execution, as one view.
#[derive(Debug, Clone)]
pub struct ExecutionDetail {
    pub execution: ChainExecution,
    pub steps: Vec<StepExecution>,
    pub entities: Vec<EntityMapping>,
}

/// The surface the app layer calls. Every read and write is family-scoped.
pub struct ChainService {
    registry: Arc<ChainRegistry>,
    definitions: Arc<dyn DefinitionStore>,
    executions: Arc<dyn ExecutionStore>,
    ledger: Arc<dyn LedgerStore>,
    jobs: Arc<dyn ScheduledJobStore>,
}

impl ChainService {
    pub fn new(
        registry: Arc<ChainRegistry>,
        definitions: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        ledger: Arc<dyn LedgerStore>,
        jobs: Arc<dyn ScheduledJobStore>,
    ) -> Self {
        Self {
            registry,
            definitions,
            executions,
            ledger,
            jobs,
        }
    }

    /// Validate and persist a new definition. New definitions start enabled.
    pub fn create_definition(
        &self,
        family_id: FamilyId,
        name: &str,
        trigger_event_type: &str,
        steps: Vec<ChainStep>,
    ) -> Result<ChainDefinition, ServiceError> {
        let definition =
            ChainDefinition::create(family_id, name, trigger_event_type, steps, &self.registry)?;
        self.definitions.insert(definition.clone())?;
        info!(
            definition = %definition.id(),
            family = %family_id,
            name,
            "chain definition created"
        );
        Ok(definition)
    }

    /// Replace a definition's recipe wholesale; enablement is untouched.
    /// Executions already running keep going against whatever revision they
    /// load next.
    pub fn update_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
        name: &str,
        trigger_event_type: &str,
        steps: Vec<ChainStep>,
    ) -> Result<ChainDefinition, ServiceError> {
        let mut definition = self.require(family_id, definition_id)?;
        definition.update(name, trigger_event_type, steps, &self.registry)?;
        self.definitions.update(&definition)?;
        Ok(definition)
    }

    pub fn enable_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<ChainDefinition, ServiceError> {
        let mut definition = self.require(family_id, definition_id)?;
        definition.enable();
        self.definitions.update(&definition)?;
        Ok(definition)
    }

    /// Disabling stops future activations; executions already running are
    /// unaffected.
    pub fn disable_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<ChainDefinition, ServiceError> {
        let mut definition = self.require(family_id, definition_id)?;
        definition.disable();
        self.definitions.update(&definition)?;
        Ok(definition)
    }

    pub fn get_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<Option<ChainDefinition>, ServiceError> {
        Ok(self.definitions.get(family_id, definition_id)?)
    }

    pub fn list_definitions(&self, family_id: FamilyId) -> Result<Vec<ChainDefinition>, ServiceError> {
        Ok(self.definitions.list_for_family(family_id)?)
    }

    /// Dry-run validation for the editor; persists nothing.
    pub fn validate_definition(
        &self,
        name: &str,
        trigger_event_type: &str,
        steps: &[ChainStep],
    ) -> Result<(), DefinitionError> {
        definition::validate(name, trigger_event_type, steps, &self.registry)
    }

    /// Triggers the editor may offer, sorted by event type.
    pub fn available_triggers(&self) -> Vec<TriggerDescriptor> {
        self.registry
            .available_triggers()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Actions the editor may offer; deprecated versions are omitted.
    pub fn available_actions(&self) -> Vec<ActionDescriptor> {
        self.registry
            .available_actions()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn executions_for_definition(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<Vec<ChainExecution>, ServiceError> {
        Ok(self.executions.list_for_definition(family_id, definition_id)?)
    }

    /// One execution with its step records and the ledger rows its steps
    /// produced.
    pub fn execution_detail(
        &self,
        family_id: FamilyId,
        execution_id: ChainExecutionId,
    ) -> Result<Option<ExecutionDetail>, ServiceError> {
        let Some(execution) = self.executions.get(family_id, execution_id)? else {
            return Ok(None);
        };
        let steps = self.executions.steps_for_execution(execution_id)?;
        let entities = self.ledger.for_execution(execution_id)?;
        Ok(Some(ExecutionDetail {
            execution,
            steps,
            entities,
        }))
    }

    /// Schedule a delayed or recurring trigger directly, outside any chain.
    /// A targeted job must point at an existing definition of the same
    /// family whose trigger matches.
    pub fn schedule_job(
        &self,
        family_id: FamilyId,
        request: ScheduleRequest,
    ) -> Result<ScheduledJob, ServiceError> {
        if let Some(definition_id) = request.only_definition {
            let Some(definition) = self.definitions.get(family_id, definition_id)? else {
                return Err(ServiceError::Validation(format!(
                    "definition {definition_id} does not exist"
                )));
            };
            if definition.trigger_event_type() != request.event_type {
                return Err(ServiceError::Validation(format!(
                    "definition {definition_id} triggers on `{}`, not `{}`",
                    definition.trigger_event_type(),
                    request.event_type
                )));
            }
        }

        let job = ScheduledJob::from_request(family_id, &request);
        self.jobs.enqueue(job.clone())?;
        info!(job = %job.id, fire_at = %job.fire_at, "job scheduled");
        Ok(job)
    }

    pub fn cancel_job(
        &self,
        family_id: FamilyId,
        job_id: ScheduledJobId,
    ) -> Result<(), ServiceError> {
        Ok(self.jobs.cancel(family_id, job_id)?)
    }

    pub fn list_jobs(&self, family_id: FamilyId) -> Result<Vec<ScheduledJob>, ServiceError> {
        Ok(self.jobs.list_for_family(family_id)?)
    }

    fn require(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<ChainDefinition, ServiceError> {
        self.definitions
            .get(family_id, definition_id)?
            .ok_or_else(|| ServiceError::Store(StoreError::NotFound(definition_id.to_string())))
    }
}
