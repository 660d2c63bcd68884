//! End-to-end tests over a running chain engine.
//!
//! Path under test: module event -> outbox -> bus -> trigger worker ->
//! orchestrator -> module actions, with the scheduler and startup recovery
//! layered on top.
//!
//! Verifies:
//! - a trigger event drives a multi-step chain against the real modules
//! - an aborting step rolls back the steps that ran before it
//! - redelivered events collapse into one execution
//! - scheduled jobs fire their definition exactly once
//! - interrupted executions resume when the engine starts

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    use hearth_calendar::{CalendarService, EVENT_CREATED, EVENT_REMINDER_DUE};
    use hearth_chains::{
        ActionContext, ActionDescriptor, ActionFailure, ActionHandler, ActionSuccess,
        ChainDefinition, ChainDefinitionId, ChainExecution, ChainRegistry, ChainRegistryBuilder,
        ChainStep, DefinitionError, ExecutionState, ModuleBundle, ScheduleRequest,
        ScheduledJobStatus, StepExecution, StepState,
    };
    use hearth_core::{EntityId, FamilyId};
    use hearth_events::{DomainEvent, InMemoryEventBus, OutboxWriter};
    use hearth_notifications::NotificationService;
    use hearth_tasks::{EVENT_COMPLETED, TaskService};

    use crate::engine::{ChainEngine, EngineConfig, EngineStores};
    use crate::orchestrator::OrchestratorConfig;
    use crate::retry::RetryPolicy;
    use crate::service::ServiceError;
    use crate::stores::{
        InMemoryDefinitionStore, InMemoryExecutionStore, InMemoryJobStore, InMemoryLedger,
        InMemoryOutbox,
    };
    use crate::workers::{OutboxPublisherConfig, SchedulerConfig};

    /// Test-only module whose single action always fails fatally.
    struct ExplodingHandler;

    impl ActionHandler for ExplodingHandler {
        fn execute(&self, _ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
            Err(ActionFailure::fatal("wired to fail"))
        }
    }

    fn chaos_bundle() -> ModuleBundle {
        ModuleBundle::new("chaos").action(
            ActionDescriptor::new("chaos.explode", 1, "Always fails"),
            Arc::new(ExplodingHandler),
        )
    }

    /// Everything the engine needs, not yet started. Tests that fabricate
    /// pre-existing state write to the stores before calling `start`.
    struct Rig {
        stores: EngineStores,
        outbox: Arc<InMemoryOutbox>,
        registry: Arc<ChainRegistry>,
        calendar: Arc<CalendarService>,
        tasks: Arc<TaskService>,
        notifications: Arc<NotificationService>,
        family: FamilyId,
    }

    fn rig() -> Rig {
        // Failing tests dump the engine's logs; set RUST_LOG to widen them.
        hearth_observability::init();

        let calendar = Arc::new(CalendarService::new());
        let tasks = Arc::new(TaskService::new());
        let notifications = Arc::new(NotificationService::new());

        let registry = ChainRegistryBuilder::new()
            .register(hearth_calendar::bundle(Arc::clone(&calendar)))
            .unwrap()
            .register(hearth_tasks::bundle(Arc::clone(&tasks)))
            .unwrap()
            .register(hearth_notifications::bundle(Arc::clone(&notifications)))
            .unwrap()
            .register(chaos_bundle())
            .unwrap()
            .build();

        let outbox = InMemoryOutbox::arc();
        let stores = EngineStores {
            definitions: InMemoryDefinitionStore::arc(),
            executions: InMemoryExecutionStore::arc(),
            ledger: InMemoryLedger::arc(),
            jobs: InMemoryJobStore::arc(),
            outbox: outbox.clone(),
        };

        Rig {
            stores,
            outbox,
            registry: Arc::new(registry),
            calendar,
            tasks,
            notifications,
            family: FamilyId::new(),
        }
    }

    impl Rig {
        fn start(self) -> Harness {
            let engine = ChainEngine::start(
                engine_config(),
                self.registry,
                self.stores.clone(),
                Arc::new(InMemoryEventBus::new()),
            );
            Harness {
                engine,
                stores: self.stores,
                outbox: self.outbox,
                calendar: self.calendar,
                tasks: self.tasks,
                notifications: self.notifications,
                family: self.family,
            }
        }
    }

    /// A full engine over in-memory stores and the real feature modules.
    struct Harness {
        engine: ChainEngine,
        stores: EngineStores,
        outbox: Arc<InMemoryOutbox>,
        calendar: Arc<CalendarService>,
        tasks: Arc<TaskService>,
        notifications: Arc<NotificationService>,
        family: FamilyId,
    }

    impl Harness {
        /// Hand an event to the engine the way modules do: via the outbox.
        fn stage(&self, event: DomainEvent) {
            self.outbox.enqueue(event).unwrap();
        }

        fn executions(&self, definition_id: ChainDefinitionId) -> Vec<ChainExecution> {
            self.stores
                .executions
                .list_for_definition(self.family, definition_id)
                .unwrap()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.engine.shutdown();
        }
    }

    fn setup() -> Harness {
        rig().start()
    }

    /// Tight polling so tests settle in milliseconds.
    fn engine_config() -> EngineConfig {
        EngineConfig {
            orchestrator: OrchestratorConfig::default()
                .with_step_retry(RetryPolicy::fixed(2, Duration::from_millis(1))),
            scheduler: SchedulerConfig::default().with_poll_interval(Duration::from_millis(10)),
            outbox: OutboxPublisherConfig::default().with_poll_interval(Duration::from_millis(10)),
        }
    }

    fn wait_until(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn a_calendar_event_drives_the_chain_end_to_end() {
        let harness = setup();
        let definition = harness
            .engine
            .service()
            .create_definition(
                harness.family,
                "Event prep",
                EVENT_CREATED,
                vec![
                    ChainStep::new(
                        0,
                        "notifications.send",
                        2,
                        json!({"body": "New plan: {{trigger.title}}"}),
                    ),
                    ChainStep::new(
                        1,
                        "tasks.create_checklist",
                        2,
                        json!({
                            "title": "Prep for {{trigger.title}}",
                            "items": ["confirm the time", "sent as {{steps.0.output.notification_id}}"],
                        }),
                    ),
                ],
            )
            .unwrap();

        let (_, event) = harness
            .calendar
            .create_entry(
                harness.family,
                "Dentist",
                Utc::now() + chrono::Duration::days(1),
                None,
            )
            .unwrap();
        harness.stage(event);

        assert!(wait_until(|| {
            harness
                .executions(definition.id())
                .first()
                .is_some_and(|execution| execution.state() == ExecutionState::Succeeded)
        }));

        let notifications = harness
            .notifications
            .visible_for_family(harness.family)
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].body, "New plan: Dentist");

        let checklists = harness.tasks.checklists_for_family(harness.family).unwrap();
        assert_eq!(checklists.len(), 1);
        assert_eq!(checklists[0].title, "Prep for Dentist");
        assert_eq!(
            checklists[0].items[1].text,
            format!("sent as {}", notifications[0].id)
        );

        let execution = &harness.executions(definition.id())[0];
        assert!(execution.first_error().is_none());
        let detail = harness
            .engine
            .service()
            .execution_detail(harness.family, execution.id())
            .unwrap()
            .unwrap();
        assert_eq!(detail.steps.len(), 2);
        assert!(detail.steps.iter().all(|step| step.state == StepState::Succeeded));
        assert_eq!(detail.entities.len(), 2);
    }

    #[test]
    fn an_aborting_step_rolls_back_what_ran_before_it() {
        let harness = setup();
        let definition = harness
            .engine
            .service()
            .create_definition(
                harness.family,
                "Celebrate finished lists",
                EVENT_COMPLETED,
                vec![
                    ChainStep::new(
                        0,
                        "calendar.create_event",
                        1,
                        json!({
                            "title": "Celebrate: {{trigger.title}}",
                            "starts_at": "2026-09-01T18:00:00Z",
                        }),
                    ),
                    ChainStep::new(1, "chaos.explode", 1, json!({})),
                ],
            )
            .unwrap();

        let checklist = harness
            .tasks
            .create_checklist(harness.family, "Chores", vec!["sweep".into()], None)
            .unwrap();
        let event = harness
            .tasks
            .finish_item(harness.family, checklist.id, 0)
            .unwrap()
            .expect("completion event");
        harness.stage(event);

        assert!(wait_until(|| {
            harness
                .executions(definition.id())
                .first()
                .is_some_and(|execution| execution.state() == ExecutionState::Failed)
        }));

        // The entry the first step created is gone again.
        assert!(harness
            .calendar
            .entries_for_family(harness.family)
            .unwrap()
            .is_empty());

        let execution = &harness.executions(definition.id())[0];
        let steps = harness
            .stores
            .executions
            .steps_for_execution(execution.id())
            .unwrap();
        assert_eq!(steps[0].state, StepState::Compensated);
        assert_eq!(steps[1].state, StepState::Failed);

        let summary = execution.first_error().expect("first error");
        assert_eq!(summary.step_index, 1);
        assert_eq!(summary.message, "wired to fail");
    }

    #[test]
    fn redelivered_events_collapse_into_one_execution() {
        let harness = setup();
        let definition = harness
            .engine
            .service()
            .create_definition(
                harness.family,
                "Announce plans",
                EVENT_CREATED,
                vec![ChainStep::new(
                    0,
                    "notifications.send",
                    2,
                    json!({"body": "{{trigger.title}}"}),
                )],
            )
            .unwrap();

        let (_, event) = harness
            .calendar
            .create_entry(harness.family, "Picnic", Utc::now(), None)
            .unwrap();
        harness.stage(event.clone());
        harness.stage(event);

        assert!(wait_until(|| {
            harness
                .executions(definition.id())
                .first()
                .is_some_and(|execution| execution.state() == ExecutionState::Succeeded)
        }));
        // Give the second delivery time to land before counting.
        thread::sleep(Duration::from_millis(100));

        assert_eq!(harness.executions(definition.id()).len(), 1);
        assert_eq!(
            harness
                .notifications
                .visible_for_family(harness.family)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn past_due_jobs_fire_their_definition_exactly_once() {
        let harness = setup();
        let definition = harness
            .engine
            .service()
            .create_definition(
                harness.family,
                "Deliver reminders",
                EVENT_REMINDER_DUE,
                vec![ChainStep::new(
                    0,
                    "notifications.send",
                    2,
                    json!({"body": "{{trigger.message}}"}),
                )],
            )
            .unwrap();

        let request = ScheduleRequest::new(
            Utc::now() - chrono::Duration::seconds(1),
            EVENT_REMINDER_DUE,
            "reminder",
            EntityId::new(),
            json!({"message": "Water the plants"}),
        )
        .for_definition(definition.id());
        harness
            .engine
            .service()
            .schedule_job(harness.family, request)
            .unwrap();

        assert!(wait_until(|| {
            harness
                .executions(definition.id())
                .first()
                .is_some_and(|execution| execution.state() == ExecutionState::Succeeded)
        }));
        thread::sleep(Duration::from_millis(100));

        assert_eq!(harness.executions(definition.id()).len(), 1);

        let jobs = harness.engine.service().list_jobs(harness.family).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, ScheduledJobStatus::Fired);
        assert!(jobs[0].fired_at.is_some());

        let notifications = harness
            .notifications
            .visible_for_family(harness.family)
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].body, "Water the plants");
    }

    #[test]
    fn a_reminder_scheduled_by_one_chain_triggers_the_next() {
        let harness = setup();
        let service = harness.engine.service();

        service
            .create_definition(
                harness.family,
                "Remind about new plans",
                EVENT_CREATED,
                vec![ChainStep::new(
                    0,
                    "calendar.schedule_reminder",
                    1,
                    json!({
                        "fire_at": Utc::now() - chrono::Duration::seconds(1),
                        "message": "Leave now for {{trigger.title}}",
                    }),
                )],
            )
            .unwrap();
        let follow_up = service
            .create_definition(
                harness.family,
                "Deliver due reminders",
                EVENT_REMINDER_DUE,
                vec![ChainStep::new(
                    0,
                    "notifications.send",
                    2,
                    json!({"body": "{{trigger.message}}"}),
                )],
            )
            .unwrap();

        let (_, event) = harness
            .calendar
            .create_entry(harness.family, "Flight", Utc::now(), None)
            .unwrap();
        harness.stage(event);

        assert!(wait_until(|| {
            harness
                .executions(follow_up.id())
                .first()
                .is_some_and(|execution| execution.state() == ExecutionState::Succeeded)
        }));

        let notifications = harness
            .notifications
            .visible_for_family(harness.family)
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].body, "Leave now for Flight");

        let jobs = service.list_jobs(harness.family).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, ScheduledJobStatus::Fired);
    }

    #[test]
    fn interrupted_executions_resume_when_the_engine_starts() {
        let rig = rig();
        let family = rig.family;

        let definition = ChainDefinition::create(
            family,
            "Trip prep",
            EVENT_CREATED,
            vec![
                ChainStep::new(0, "notifications.send", 2, json!({"body": "Pack tonight"})),
                ChainStep::new(
                    1,
                    "tasks.create_checklist",
                    2,
                    json!({"title": "Packing for {{trigger.title}}"}),
                ),
            ],
            &rig.registry,
        )
        .unwrap();
        rig.stores.definitions.insert(definition.clone()).unwrap();

        // An execution a previous process life left mid-flight: step 0 done,
        // step 1 never started.
        let mut execution = ChainExecution::new(
            definition.id(),
            family,
            Uuid::now_v7(),
            EVENT_CREATED,
            json!({"title": "Lisbon"}),
        );
        execution.begin().unwrap();
        rig.stores.executions.insert_new(execution.clone()).unwrap();
        let mut done = StepExecution::new(execution.id(), 0, json!({"body": "Pack tonight"}));
        done.mark_running();
        done.record_attempt();
        done.mark_succeeded(None);
        rig.stores.executions.upsert_step(done).unwrap();

        let harness = rig.start();

        assert!(wait_until(|| {
            harness
                .stores
                .executions
                .get(family, execution.id())
                .unwrap()
                .is_some_and(|resumed| resumed.state() == ExecutionState::Succeeded)
        }));

        // The settled step is skipped, only the missing one runs.
        assert!(harness
            .notifications
            .visible_for_family(family)
            .unwrap()
            .is_empty());
        let checklists = harness.tasks.checklists_for_family(family).unwrap();
        assert_eq!(checklists.len(), 1);
        assert_eq!(checklists[0].title, "Packing for Lisbon");
    }

    #[test]
    fn saving_a_definition_with_a_deprecated_action_is_rejected() {
        let harness = setup();

        let err = harness
            .engine
            .service()
            .create_definition(
                harness.family,
                "Legacy ping",
                EVENT_CREATED,
                vec![ChainStep::new(
                    0,
                    "notifications.send",
                    1,
                    json!({"message": "hi"}),
                )],
            )
            .unwrap_err();

        assert!(matches!(
            err,
            ServiceError::Definition(DefinitionError::DeprecatedAction { index: 0, .. })
        ));
        assert!(harness
            .engine
            .service()
            .list_definitions(harness.family)
            .unwrap()
            .is_empty());
    }
}
