//! The chain orchestrator: turns trigger events into executions and drives
//! each execution through its steps.
//!
//! Steps run strictly in order. A step failure either aborts the execution,
//! compensating previously applied steps in reverse, or is tolerated when the
//! step opted in via `continue_on_failure`. Every state change is persisted
//! before the orchestrator moves on, so a crashed execution resumes from its
//! records instead of re-running completed work.

use std::collections::BTreeMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use hearth_chains::{
    ActionContext, ActionFailure, ActionHandler, ActionSuccess, ChainDefinition,
    ChainDefinitionId, ChainExecution, ChainRegistry, ChainStep, CompensationContext,
    CompensationFailure, EntityMapping, ExecutionState, ScheduledJob, StepExecution, StepState,
    TemplateInputs, mapping,
};
use hearth_core::DomainError;
use hearth_events::DomainEvent;

use crate::retry::RetryPolicy;
use crate::stores::{
    DefinitionStore, ExecutionStore, InsertOutcome, LedgerStore, ScheduledJobStore, StoreError,
};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wall-clock budget per handler invocation when the action's descriptor
    /// carries no override.
    pub default_action_timeout: Duration,
    /// Attempt budget for retryable step failures.
    pub step_retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_action_timeout: Duration::from_secs(30),
            step_retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_default_action_timeout(mut self, timeout: Duration) -> Self {
        self.default_action_timeout = timeout;
        self
    }

    pub fn with_step_retry(mut self, policy: RetryPolicy) -> Self {
        self.step_retry = policy;
        self
    }
}

/// Orchestrator error.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("definition {0} no longer exists")]
    DefinitionMissing(ChainDefinitionId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Drives chain executions: activation, forward progress, compensation.
///
/// The orchestrator is stateless between calls; everything it knows lives in
/// the stores. It is shared across worker threads behind an [`Arc`].
pub struct Orchestrator {
    registry: Arc<ChainRegistry>,
    definitions: Arc<dyn DefinitionStore>,
    executions: Arc<dyn ExecutionStore>,
    ledger: Arc<dyn LedgerStore>,
    jobs: Arc<dyn ScheduledJobStore>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ChainRegistry>,
        definitions: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        ledger: Arc<dyn LedgerStore>,
        jobs: Arc<dyn ScheduledJobStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            definitions,
            executions,
            ledger,
            jobs,
            config,
        }
    }

    /// Create executions for every enabled definition of the event's family
    /// whose trigger matches. With `only_definition` set (scheduled jobs),
    /// matching considers just that definition.
    ///
    /// Creation is idempotent on `(definition_id, correlation_id)`, the
    /// correlation id being the event id: redelivery returns nothing new.
    pub fn activate(
        &self,
        event: &DomainEvent,
        only_definition: Option<ChainDefinitionId>,
    ) -> Result<Vec<ChainExecution>, OrchestratorError> {
        let candidates = match only_definition {
            Some(definition_id) => {
                match self.definitions.get(event.family_id(), definition_id)? {
                    Some(definition) if !definition.is_enabled() => {
                        debug!(definition = %definition_id, "targeted definition is disabled");
                        Vec::new()
                    }
                    Some(definition)
                        if definition.trigger_event_type() != event.event_type() =>
                    {
                        warn!(
                            definition = %definition_id,
                            expected = definition.trigger_event_type(),
                            got = event.event_type(),
                            "targeted definition no longer matches the trigger"
                        );
                        Vec::new()
                    }
                    Some(definition) => vec![definition],
                    None => {
                        warn!(definition = %definition_id, "targeted definition does not exist");
                        Vec::new()
                    }
                }
            }
            None => self
                .definitions
                .enabled_for_trigger(event.family_id(), event.event_type())?,
        };

        let mut created = Vec::new();
        for definition in candidates {
            let execution = ChainExecution::new(
                definition.id(),
                event.family_id(),
                event.event_id(),
                event.event_type(),
                event.payload().clone(),
            );
            match self.executions.insert_new(execution.clone())? {
                InsertOutcome::Created => {
                    debug!(
                        execution = %execution.id(),
                        definition = %definition.id(),
                        trigger = event.event_type(),
                        "chain execution created"
                    );
                    created.push(execution);
                }
                InsertOutcome::Duplicate => {
                    debug!(
                        definition = %definition.id(),
                        correlation = %event.event_id(),
                        "duplicate trigger delivery suppressed"
                    );
                }
            }
        }

        Ok(created)
    }

    /// Drive one execution to a terminal state. Accepts executions in any
    /// state: fresh ones run from the top, interrupted ones resume from
    /// their persisted records, terminal ones come straight back.
    pub fn run(&self, mut execution: ChainExecution) -> Result<ChainExecution, OrchestratorError> {
        if execution.state().is_terminal() {
            return Ok(execution);
        }

        let definition = self
            .definitions
            .get(execution.family_id(), execution.definition_id())?
            .ok_or(OrchestratorError::DefinitionMissing(execution.definition_id()))?;

        let mut steps: BTreeMap<u32, StepExecution> = self
            .executions
            .steps_for_execution(execution.id())?
            .into_iter()
            .map(|record| (record.step_index, record))
            .collect();

        if execution.state() == ExecutionState::Pending {
            execution.begin()?;
            self.executions.update(&execution)?;
            info!(
                execution = %execution.id(),
                definition = %definition.id(),
                "chain execution started"
            );
        }

        if execution.state() == ExecutionState::Running {
            self.advance(&mut execution, &definition, &mut steps)?;
        } else if execution.state() == ExecutionState::Compensating {
            self.compensate(&mut execution, &definition, &mut steps)?;
        }

        Ok(execution)
    }

    /// Forward pass: run every step the records show as unsettled, in order.
    fn advance(
        &self,
        execution: &mut ChainExecution,
        definition: &ChainDefinition,
        steps: &mut BTreeMap<u32, StepExecution>,
    ) -> Result<(), OrchestratorError> {
        for step in definition.steps() {
            // A settled record means this step already ran to an outcome in a
            // previous process life; its outcome still steers the loop below,
            // so an interrupted abort resumes into compensation. A Running
            // record means the invocation was interrupted before its outcome
            // landed; handlers are idempotent per (correlation_id,
            // step_index), so it runs again.
            let record = match steps.get(&step.index) {
                Some(existing) if existing.state.is_settled() => existing.clone(),
                _ => {
                    let record = self.invoke_step(execution, step, steps)?;
                    steps.insert(step.index, record.clone());
                    record
                }
            };

            if record.state == StepState::Failed {
                let message = record.error.as_deref().unwrap_or("step failed");
                execution.record_first_error(step.index, message);

                if step.continue_on_failure {
                    debug!(
                        execution = %execution.id(),
                        step = step.index,
                        "step failure tolerated"
                    );
                    continue;
                }

                execution.begin_compensation()?;
                self.executions.update(execution)?;
                return self.compensate(execution, definition, steps);
            }
        }

        execution.complete()?;
        self.executions.update(execution)?;
        info!(execution = %execution.id(), "chain execution succeeded");
        Ok(())
    }

    /// Build the step's input, then invoke its handler under the retry and
    /// timeout budget. Returns the settled step record; infrastructure
    /// failures are the only errors.
    fn invoke_step(
        &self,
        execution: &ChainExecution,
        step: &ChainStep,
        steps: &BTreeMap<u32, StepExecution>,
    ) -> Result<StepExecution, OrchestratorError> {
        let entities = self.ledger.for_execution(execution.id())?;
        let mut inputs = TemplateInputs::new(
            execution.trigger_payload(),
            execution.family_id(),
            execution.correlation_id(),
            execution.id(),
        );
        for record in steps.values() {
            if record.state == StepState::Succeeded {
                if let Some(output) = record.output.as_ref() {
                    inputs.add_step_output(record.step_index, output);
                }
            }
        }
        inputs.set_entities(&entities);

        let input = match mapping::resolve(&step.input_template, &inputs) {
            Ok(input) => input,
            Err(e) => {
                // Input mapping failures are step failures; the abort policy
                // decides what happens to the execution.
                let mut record = StepExecution::new(execution.id(), step.index, JsonValue::Null);
                record.mark_failed(format!("input mapping failed: {e}"));
                self.executions.upsert_step(record.clone())?;
                warn!(
                    execution = %execution.id(),
                    step = step.index,
                    error = %e,
                    "step input mapping failed"
                );
                return Ok(record);
            }
        };

        let Some(handler) = self.registry.handler(&step.action_type, step.action_version) else {
            let mut record = StepExecution::new(execution.id(), step.index, input);
            record.mark_failed(format!(
                "action `{}` v{} is not registered",
                step.action_type, step.action_version
            ));
            self.executions.upsert_step(record.clone())?;
            warn!(
                execution = %execution.id(),
                step = step.index,
                action = %step.action_type,
                version = step.action_version,
                "step action is not registered"
            );
            return Ok(record);
        };
        let timeout = self.action_timeout(&step.action_type, step.action_version);

        // Reuse an interrupted record so its attempt count carries over.
        let mut record = match steps.get(&step.index) {
            Some(existing) => {
                let mut record = existing.clone();
                record.input = input.clone();
                record
            }
            None => StepExecution::new(execution.id(), step.index, input.clone()),
        };
        record.mark_running();
        self.executions.upsert_step(record.clone())?;

        let ctx = ActionContext {
            family_id: execution.family_id(),
            execution_id: execution.id(),
            correlation_id: execution.correlation_id(),
            step_index: step.index,
            input,
        };

        loop {
            record.record_attempt();
            self.executions.upsert_step(record.clone())?;

            match invoke_with_timeout(Arc::clone(&handler), ctx.clone(), timeout) {
                Ok(success) => {
                    record.mark_succeeded(success.output.clone());
                    self.executions.upsert_step(record.clone())?;
                    self.record_side_effects(execution, step.index, &success)?;
                    debug!(
                        execution = %execution.id(),
                        step = step.index,
                        attempts = record.attempts,
                        "step succeeded"
                    );
                    return Ok(record);
                }
                Err(failure)
                    if failure.is_retryable()
                        && self.config.step_retry.should_retry(record.attempts) =>
                {
                    let delay = self.config.step_retry.delay_for_attempt(record.attempts);
                    warn!(
                        execution = %execution.id(),
                        step = step.index,
                        attempt = record.attempts,
                        error = %failure,
                        "step attempt failed; retrying"
                    );
                    thread::sleep(delay);
                }
                Err(failure) => {
                    record.mark_failed(failure.message());
                    self.executions.upsert_step(record.clone())?;
                    warn!(
                        execution = %execution.id(),
                        step = step.index,
                        attempts = record.attempts,
                        error = %failure,
                        "step failed"
                    );
                    return Ok(record);
                }
            }
        }
    }

    /// Persist what a succeeded step left behind: ledger rows for created
    /// entities, scheduled jobs for requested follow-ups.
    fn record_side_effects(
        &self,
        execution: &ChainExecution,
        step_index: u32,
        success: &ActionSuccess,
    ) -> Result<(), OrchestratorError> {
        if !success.created_entities.is_empty() {
            let rows: Vec<_> = success
                .created_entities
                .iter()
                .map(|created| EntityMapping::from_created(execution.id(), step_index, created))
                .collect();
            self.ledger.append(rows)?;
        }

        for request in &success.scheduled_jobs {
            let job = ScheduledJob::from_request(execution.family_id(), request);
            debug!(
                execution = %execution.id(),
                step = step_index,
                job = %job.id,
                fire_at = %job.fire_at,
                "step scheduled a follow-up job"
            );
            self.jobs.enqueue(job)?;
        }

        Ok(())
    }

    /// Compensation pass: undo every step the records show as Succeeded, in
    /// strict reverse order, then settle the execution. Resuming after a
    /// crash skips steps that already compensated and keeps the failed flag
    /// of ones that could not.
    fn compensate(
        &self,
        execution: &mut ChainExecution,
        definition: &ChainDefinition,
        steps: &mut BTreeMap<u32, StepExecution>,
    ) -> Result<(), OrchestratorError> {
        let mut any_failed = steps
            .values()
            .any(|record| record.state == StepState::CompensationFailed);

        let targets: Vec<u32> = steps
            .values()
            .filter(|record| record.state == StepState::Succeeded)
            .map(|record| record.step_index)
            .collect();

        for &index in targets.iter().rev() {
            let rows = self.ledger.for_step(execution.id(), index)?;
            let Some(record) = steps.get_mut(&index) else {
                continue;
            };

            let ctx = CompensationContext {
                family_id: execution.family_id(),
                execution_id: execution.id(),
                correlation_id: execution.correlation_id(),
                step_index: index,
                input: record.input.clone(),
                output: record.output.clone(),
                created_entities: rows,
            };

            let outcome = match definition.step(index) {
                None => Err(CompensationFailure::new(
                    "step no longer exists in the definition",
                )),
                Some(step) => match self.registry.handler(&step.action_type, step.action_version)
                {
                    None => Err(CompensationFailure::new(format!(
                        "action `{}` v{} is not registered",
                        step.action_type, step.action_version
                    ))),
                    Some(handler) => {
                        let timeout =
                            self.action_timeout(&step.action_type, step.action_version);
                        compensate_with_timeout(handler, ctx, timeout)
                    }
                },
            };

            match outcome {
                Ok(()) => {
                    record.mark_compensated();
                    debug!(execution = %execution.id(), step = index, "step compensated");
                }
                Err(failure) => {
                    any_failed = true;
                    record.mark_compensation_failed(&failure.message);
                    warn!(
                        execution = %execution.id(),
                        step = index,
                        error = %failure,
                        "step compensation failed"
                    );
                }
            }
            self.executions.upsert_step(record.clone())?;
        }

        if any_failed {
            execution.fail_compensation()?;
            warn!(
                execution = %execution.id(),
                "chain execution failed; compensation incomplete, manual repair required"
            );
        } else {
            execution.fail()?;
            info!(
                execution = %execution.id(),
                "chain execution failed; applied steps compensated"
            );
        }
        self.executions.update(execution)?;
        Ok(())
    }

    fn action_timeout(&self, action_type: &str, version: u32) -> Duration {
        self.registry
            .action(action_type, version)
            .and_then(|descriptor| descriptor.timeout)
            .unwrap_or(self.config.default_action_timeout)
    }
}

/// Run `execute` on its own thread so a stuck handler cannot wedge the
/// execution. On timeout the invocation thread is left to finish in the
/// background; its result has nowhere to go.
fn invoke_with_timeout(
    handler: Arc<dyn ActionHandler>,
    ctx: ActionContext,
    timeout: Duration,
) -> Result<ActionSuccess, ActionFailure> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("chain-step-{}", ctx.step_index))
        .spawn(move || {
            let _ = tx.send(handler.execute(&ctx));
        });

    let invocation = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            return Err(ActionFailure::retryable(format!(
                "failed to spawn step thread: {e}"
            )));
        }
    };

    match rx.recv_timeout(timeout) {
        Ok(outcome) => {
            let _ = invocation.join();
            outcome
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(ActionFailure::retryable(format!(
            "action timed out after {}ms",
            timeout.as_millis()
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            let _ = invocation.join();
            Err(ActionFailure::fatal("action handler panicked"))
        }
    }
}

/// Timeout-bounded twin of [`invoke_with_timeout`] for the undo direction.
fn compensate_with_timeout(
    handler: Arc<dyn ActionHandler>,
    ctx: CompensationContext,
    timeout: Duration,
) -> Result<(), CompensationFailure> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("chain-undo-{}", ctx.step_index))
        .spawn(move || {
            let _ = tx.send(handler.compensate(&ctx));
        });

    let invocation = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            return Err(CompensationFailure::new(format!(
                "failed to spawn compensation thread: {e}"
            )));
        }
    };

    match rx.recv_timeout(timeout) {
        Ok(outcome) => {
            let _ = invocation.join();
            outcome
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CompensationFailure::new(format!(
            "compensation timed out after {}ms",
            timeout.as_millis()
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            let _ = invocation.join();
            Err(CompensationFailure::new("compensation handler panicked"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    use hearth_chains::{
        ActionDescriptor, ChainRegistryBuilder, CreatedEntity, ModuleBundle, ScheduleRequest,
        ScheduledJobStatus,
    };
    use hearth_core::{EntityId, FamilyId};

    use crate::stores::{
        InMemoryDefinitionStore, InMemoryExecutionStore, InMemoryJobStore, InMemoryLedger,
    };

    /// Shared invocation log the scripted handlers write into.
    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<u32>>,
        compensated: Mutex<Vec<u32>>,
    }

    impl Recorder {
        fn executed(&self) -> Vec<u32> {
            self.executed.lock().unwrap().clone()
        }

        fn compensated(&self) -> Vec<u32> {
            self.compensated.lock().unwrap().clone()
        }
    }

    /// Succeeds, optionally with an output and a created entity.
    struct OkHandler {
        recorder: Arc<Recorder>,
        output: Option<JsonValue>,
        entity_type: Option<&'static str>,
    }

    impl ActionHandler for OkHandler {
        fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            self.recorder.executed.lock().unwrap().push(ctx.step_index);
            let mut success = match &self.output {
                Some(output) => ActionSuccess::with_output(output.clone()),
                None => ActionSuccess::empty(),
            };
            if let Some(entity_type) = self.entity_type {
                success =
                    success.and_entity(CreatedEntity::new(entity_type, EntityId::new(), "stub"));
            }
            Ok(success)
        }

        fn compensate(&self, ctx: &CompensationContext) -> Result<(), CompensationFailure> {
            self.recorder.compensated.lock().unwrap().push(ctx.step_index);
            Ok(())
        }
    }

    /// Always fails the same way.
    struct FailHandler {
        failure: ActionFailure,
    }

    impl ActionHandler for FailHandler {
        fn execute(&self, _ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            Err(self.failure.clone())
        }
    }

    /// Fails retryably N times, then succeeds.
    struct FlakyHandler {
        failures_left: Mutex<u32>,
    }

    impl ActionHandler for FlakyHandler {
        fn execute(&self, _ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(ActionFailure::retryable("still warming up"));
            }
            Ok(ActionSuccess::empty())
        }
    }

    /// Sleeps past any reasonable test timeout.
    struct SleepyHandler;

    impl ActionHandler for SleepyHandler {
        fn execute(&self, _ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            thread::sleep(Duration::from_secs(2));
            Ok(ActionSuccess::empty())
        }
    }

    /// Succeeds with an entity, then refuses to undo it.
    struct BadUndoHandler {
        recorder: Arc<Recorder>,
    }

    impl ActionHandler for BadUndoHandler {
        fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            self.recorder.executed.lock().unwrap().push(ctx.step_index);
            Ok(ActionSuccess::empty()
                .and_entity(CreatedEntity::new("widget", EntityId::new(), "stub")))
        }

        fn compensate(&self, _ctx: &CompensationContext) -> Result<(), CompensationFailure> {
            Err(CompensationFailure::new("undo hit a wall"))
        }
    }

    struct PanickyHandler;

    impl ActionHandler for PanickyHandler {
        fn execute(&self, _ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            panic!("handler bug");
        }
    }

    struct SchedulingHandler;

    impl ActionHandler for SchedulingHandler {
        fn execute(&self, _ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            Ok(ActionSuccess::empty().and_schedule(ScheduleRequest::new(
                chrono::Utc::now() + chrono::Duration::hours(1),
                "stub.later",
                "stub",
                EntityId::new(),
                json!({"note": "later"}),
            )))
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        registry: Arc<ChainRegistry>,
        definitions: Arc<InMemoryDefinitionStore>,
        executions: Arc<InMemoryExecutionStore>,
        ledger: Arc<InMemoryLedger>,
        jobs: Arc<InMemoryJobStore>,
    }

    fn fixture(bundle: ModuleBundle, config: OrchestratorConfig) -> Fixture {
        let registry = Arc::new(ChainRegistryBuilder::new().register(bundle).unwrap().build());
        let definitions = InMemoryDefinitionStore::arc();
        let executions = InMemoryExecutionStore::arc();
        let ledger = InMemoryLedger::arc();
        let jobs = InMemoryJobStore::arc();

        let orchestrator = Orchestrator::new(
            Arc::clone(&registry),
            definitions.clone(),
            executions.clone(),
            ledger.clone(),
            jobs.clone(),
            config,
        );

        Fixture {
            orchestrator,
            registry,
            definitions,
            executions,
            ledger,
            jobs,
        }
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_step_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
    }

    fn save_definition(fixture: &Fixture, family: FamilyId, steps: Vec<ChainStep>) -> ChainDefinition {
        let definition = ChainDefinition::create(
            family,
            "Recipe",
            "calendar.event.created",
            steps,
            &fixture.registry,
        )
        .unwrap();
        fixture.definitions.insert(definition.clone()).unwrap();
        definition
    }

    fn trigger_event(family: FamilyId) -> DomainEvent {
        DomainEvent::record(
            family,
            "calendar.event.created",
            "calendar_event",
            EntityId::new(),
            json!({"title": "Dentist"}),
        )
    }

    fn activate_one(fixture: &Fixture, event: &DomainEvent) -> ChainExecution {
        let mut created = fixture.orchestrator.activate(event, None).unwrap();
        assert_eq!(created.len(), 1);
        created.remove(0)
    }

    #[test]
    fn happy_path_runs_steps_in_order_and_records_everything() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.first", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: Some(json!({"id": "a"})),
                    entity_type: Some("widget"),
                }),
            )
            .action(
                ActionDescriptor::new("stub.second", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.first", 1, json!({"note": "{{trigger.title}}"})),
                ChainStep::new(
                    1,
                    "stub.second",
                    1,
                    json!({"from": "{{steps.0.output.id}}", "widget": "{{steps.0.entity.widget}}"}),
                ),
            ],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Succeeded);
        assert!(finished.first_error().is_none());
        assert_eq!(recorder.executed(), vec![0, 1]);
        assert!(recorder.compensated().is_empty());

        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].state, StepState::Succeeded);
        assert_eq!(steps[0].input, json!({"note": "Dentist"}));
        assert_eq!(steps[0].output, Some(json!({"id": "a"})));
        assert_eq!(steps[0].attempts, 1);
        assert_eq!(steps[1].state, StepState::Succeeded);
        assert_eq!(steps[1].input["from"], json!("a"));

        let rows = fixture.ledger.for_execution(finished.id()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entity_type, "widget");
        assert_eq!(
            steps[1].input["widget"],
            json!(rows[0].entity_id.to_string())
        );
    }

    #[test]
    fn aborting_failure_compensates_succeeded_steps_in_reverse() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: Some("widget"),
                }),
            )
            .action(
                ActionDescriptor::new("stub.boom", 1, ""),
                Arc::new(FailHandler {
                    failure: ActionFailure::fatal("boom"),
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.ok", 1, json!({})),
                ChainStep::new(1, "stub.ok", 1, json!({})),
                ChainStep::new(2, "stub.boom", 1, json!({})),
            ],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Failed);
        let summary = finished.first_error().unwrap();
        assert_eq!(summary.step_index, 2);
        assert_eq!(summary.message, "boom");
        assert!(finished.finished_at().is_some());

        // Undo happened, newest applied step first.
        assert_eq!(recorder.compensated(), vec![1, 0]);

        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].state, StepState::Compensated);
        assert_eq!(steps[1].state, StepState::Compensated);
        assert_eq!(steps[2].state, StepState::Failed);
    }

    #[test]
    fn tolerated_failure_keeps_the_chain_going() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: None,
                }),
            )
            .action(
                ActionDescriptor::new("stub.boom", 1, ""),
                Arc::new(FailHandler {
                    failure: ActionFailure::fatal("boom"),
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.ok", 1, json!({})),
                ChainStep::new(1, "stub.boom", 1, json!({})).tolerating_failure(),
                ChainStep::new(2, "stub.ok", 1, json!({})),
            ],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Succeeded);
        assert_eq!(recorder.executed(), vec![0, 2]);
        assert!(recorder.compensated().is_empty());

        // The tolerated failure is still visible.
        assert_eq!(finished.first_error().unwrap().step_index, 1);
        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[1].state, StepState::Failed);
        assert_eq!(steps[2].state, StepState::Succeeded);
    }

    #[test]
    fn retryable_failures_consume_the_attempt_budget() {
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.flaky", 1, ""),
                Arc::new(FlakyHandler {
                    failures_left: Mutex::new(2),
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.flaky", 1, json!({}))],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Succeeded);
        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].attempts, 3);
    }

    #[test]
    fn exhausted_retries_fail_the_step() {
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.down", 1, ""),
                Arc::new(FailHandler {
                    failure: ActionFailure::retryable("still down"),
                }),
            );
        let fixture = fixture(
            bundle,
            OrchestratorConfig::default()
                .with_step_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
        );

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.down", 1, json!({}))],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        // Nothing succeeded before the failure; the compensation pass is empty.
        assert_eq!(finished.state(), ExecutionState::Failed);
        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].state, StepState::Failed);
        assert_eq!(steps[0].attempts, 2);
        assert_eq!(steps[0].error.as_deref(), Some("still down"));
    }

    #[test]
    fn timeouts_are_retryable_failures() {
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.slow", 1, "")
                    .with_timeout(Duration::from_millis(20)),
                Arc::new(SleepyHandler),
            );
        let fixture = fixture(
            bundle,
            OrchestratorConfig::default().with_step_retry(RetryPolicy::no_retry()),
        );

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.slow", 1, json!({}))],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Failed);
        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].state, StepState::Failed);
        assert!(steps[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn panicking_handlers_fail_the_step_fatally() {
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(ActionDescriptor::new("stub.buggy", 1, ""), Arc::new(PanickyHandler));
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.buggy", 1, json!({}))],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Failed);
        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].attempts, 1);
        assert!(steps[0].error.as_deref().unwrap().contains("panicked"));
    }

    #[test]
    fn unresolvable_template_fails_the_step_at_run_time() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![ChainStep::new(
                0,
                "stub.ok",
                1,
                json!({"note": "{{trigger.missing.path}}"}),
            )],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Failed);
        assert!(recorder.executed().is_empty(), "handler must not run on bad input");

        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].state, StepState::Failed);
        assert_eq!(steps[0].input, JsonValue::Null);
        assert!(steps[0].error.as_deref().unwrap().contains("input mapping failed"));
    }

    #[test]
    fn failed_compensation_flags_the_execution_for_repair() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.sticky", 1, ""),
                Arc::new(BadUndoHandler {
                    recorder: Arc::clone(&recorder),
                }),
            )
            .action(
                ActionDescriptor::new("stub.boom", 1, ""),
                Arc::new(FailHandler {
                    failure: ActionFailure::fatal("boom"),
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.sticky", 1, json!({})),
                ChainStep::new(1, "stub.boom", 1, json!({})),
            ],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::CompensationFailed);
        let steps = fixture.executions.steps_for_execution(finished.id()).unwrap();
        assert_eq!(steps[0].state, StepState::CompensationFailed);
        assert_eq!(steps[0].error.as_deref(), Some("undo hit a wall"));
    }

    #[test]
    fn duplicate_trigger_delivery_is_suppressed() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder,
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        let definition = save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.ok", 1, json!({}))],
        );

        let event = trigger_event(family);
        let first = fixture.orchestrator.activate(&event, None).unwrap();
        let second = fixture.orchestrator.activate(&event, None).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let listed = fixture
            .executions
            .list_for_definition(family, definition.id())
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn activation_only_considers_matching_enabled_definitions() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .trigger("tasks.checklist.completed", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder,
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());
        let family = FamilyId::new();

        let matching = save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.ok", 1, json!({}))],
        );

        let mut disabled = ChainDefinition::create(
            family,
            "Disabled",
            "calendar.event.created",
            vec![ChainStep::new(0, "stub.ok", 1, json!({}))],
            &fixture.registry,
        )
        .unwrap();
        disabled.disable();
        fixture.definitions.insert(disabled).unwrap();

        let other_trigger = ChainDefinition::create(
            family,
            "Other trigger",
            "tasks.checklist.completed",
            vec![ChainStep::new(0, "stub.ok", 1, json!({}))],
            &fixture.registry,
        )
        .unwrap();
        fixture.definitions.insert(other_trigger).unwrap();

        let created = fixture
            .orchestrator
            .activate(&trigger_event(family), None)
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].definition_id(), matching.id());
    }

    #[test]
    fn targeted_activation_checks_enablement_and_trigger() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .trigger("tasks.checklist.completed", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder,
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());
        let family = FamilyId::new();

        let definition = save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.ok", 1, json!({}))],
        );

        // Matching target runs.
        let created = fixture
            .orchestrator
            .activate(&trigger_event(family), Some(definition.id()))
            .unwrap();
        assert_eq!(created.len(), 1);

        // Missing definition is skipped, not an error.
        let created = fixture
            .orchestrator
            .activate(&trigger_event(family), Some(ChainDefinitionId::new()))
            .unwrap();
        assert!(created.is_empty());

        // Trigger mismatch is skipped.
        let wrong_event = DomainEvent::record(
            family,
            "tasks.checklist.completed",
            "checklist",
            EntityId::new(),
            json!({}),
        );
        let created = fixture
            .orchestrator
            .activate(&wrong_event, Some(definition.id()))
            .unwrap();
        assert!(created.is_empty());

        // Disabled definition is skipped.
        let mut disabled = fixture
            .definitions
            .get(family, definition.id())
            .unwrap()
            .unwrap();
        disabled.disable();
        fixture.definitions.update(&disabled).unwrap();
        let created = fixture
            .orchestrator
            .activate(&trigger_event(family), Some(definition.id()))
            .unwrap();
        assert!(created.is_empty());
    }

    #[test]
    fn resume_skips_settled_steps() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.ok", 1, json!({})),
                ChainStep::new(1, "stub.ok", 1, json!({})),
            ],
        );

        // The process died after step 0 landed but before step 1 started.
        let mut execution = activate_one(&fixture, &trigger_event(family));
        execution.begin().unwrap();
        fixture.executions.update(&execution).unwrap();

        let mut done = StepExecution::new(execution.id(), 0, json!({}));
        done.mark_running();
        done.record_attempt();
        done.mark_succeeded(None);
        fixture.executions.upsert_step(done).unwrap();

        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Succeeded);
        assert_eq!(recorder.executed(), vec![1], "step 0 must not run again");
    }

    #[test]
    fn resume_diverts_to_compensation_after_an_interrupted_abort() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: None,
                }),
            )
            .action(
                ActionDescriptor::new("stub.boom", 1, ""),
                Arc::new(FailHandler {
                    failure: ActionFailure::fatal("boom"),
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.ok", 1, json!({})),
                ChainStep::new(1, "stub.boom", 1, json!({})),
            ],
        );

        // The process died after the failing step's record landed but before
        // the execution flipped to Compensating.
        let mut execution = activate_one(&fixture, &trigger_event(family));
        execution.begin().unwrap();
        fixture.executions.update(&execution).unwrap();

        let mut done = StepExecution::new(execution.id(), 0, json!({}));
        done.mark_running();
        done.record_attempt();
        done.mark_succeeded(None);
        fixture.executions.upsert_step(done).unwrap();

        let mut broke = StepExecution::new(execution.id(), 1, json!({}));
        broke.mark_running();
        broke.record_attempt();
        broke.mark_failed("boom");
        fixture.executions.upsert_step(broke).unwrap();

        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::Failed);
        assert_eq!(finished.first_error().unwrap().step_index, 1);
        assert!(recorder.executed().is_empty(), "no step may run again");
        assert_eq!(recorder.compensated(), vec![0]);
    }

    #[test]
    fn resumed_compensation_skips_undone_steps_and_keeps_the_flag() {
        let recorder = Arc::new(Recorder::default());
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(
                ActionDescriptor::new("stub.ok", 1, ""),
                Arc::new(OkHandler {
                    recorder: Arc::clone(&recorder),
                    output: None,
                    entity_type: None,
                }),
            );
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![
                ChainStep::new(0, "stub.ok", 1, json!({})),
                ChainStep::new(1, "stub.ok", 1, json!({})),
                ChainStep::new(2, "stub.ok", 1, json!({})),
            ],
        );

        // The process died mid-compensation: step 2 could not be undone,
        // step 1 was, step 0 is still waiting.
        let mut execution = activate_one(&fixture, &trigger_event(family));
        execution.begin().unwrap();
        fixture.executions.update(&execution).unwrap();
        execution.begin_compensation().unwrap();
        fixture.executions.update(&execution).unwrap();

        let mut waiting = StepExecution::new(execution.id(), 0, json!({}));
        waiting.mark_running();
        waiting.record_attempt();
        waiting.mark_succeeded(None);
        fixture.executions.upsert_step(waiting).unwrap();

        let mut undone = StepExecution::new(execution.id(), 1, json!({}));
        undone.mark_running();
        undone.record_attempt();
        undone.mark_succeeded(None);
        undone.mark_compensated();
        fixture.executions.upsert_step(undone).unwrap();

        let mut stuck = StepExecution::new(execution.id(), 2, json!({}));
        stuck.mark_running();
        stuck.record_attempt();
        stuck.mark_succeeded(None);
        stuck.mark_compensation_failed("undo hit a wall");
        fixture.executions.upsert_step(stuck).unwrap();

        let finished = fixture.orchestrator.run(execution).unwrap();

        assert_eq!(finished.state(), ExecutionState::CompensationFailed);
        assert_eq!(recorder.compensated(), vec![0], "only the waiting step is undone");
    }

    #[test]
    fn steps_can_schedule_follow_up_jobs() {
        let bundle = ModuleBundle::new("stub")
            .trigger("calendar.event.created", "")
            .action(ActionDescriptor::new("stub.later", 1, ""), Arc::new(SchedulingHandler));
        let fixture = fixture(bundle, fast_config());

        let family = FamilyId::new();
        save_definition(
            &fixture,
            family,
            vec![ChainStep::new(0, "stub.later", 1, json!({}))],
        );

        let execution = activate_one(&fixture, &trigger_event(family));
        let finished = fixture.orchestrator.run(execution).unwrap();
        assert_eq!(finished.state(), ExecutionState::Succeeded);

        let jobs = fixture.jobs.list_for_family(family).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, ScheduledJobStatus::Pending);
        assert_eq!(jobs[0].trigger.event_type, "stub.later");
    }
}
