//! Wires the registry, stores, and workers into one running engine.

use std::sync::Arc;

use tracing::{info, warn};

use hearth_chains::ChainRegistry;
use hearth_events::{DomainEvent, EventBus};

use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::service::ChainService;
use crate::stores::{
    DefinitionStore, ExecutionStore, LedgerStore, OutboxStore, ScheduledJobStore,
};
use crate::workers::{
    OutboxPublisher, OutboxPublisherConfig, Scheduler, SchedulerConfig, TriggerWorker,
    WorkerHandle, spawn_run,
};

/// Engine tuning, one knob set per component.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
    pub outbox: OutboxPublisherConfig,
}

/// The persistent stores the engine runs against.
#[derive(Clone)]
pub struct EngineStores {
    pub definitions: Arc<dyn DefinitionStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub jobs: Arc<dyn ScheduledJobStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

/// A running chain engine: orchestrator, service, and the three workers.
///
/// Dropping the engine without calling [`shutdown`](Self::shutdown) leaves
/// the worker threads running until the process exits.
pub struct ChainEngine {
    service: ChainService,
    orchestrator: Arc<Orchestrator>,
    workers: Vec<WorkerHandle>,
}

impl ChainEngine {
    /// Start the engine: resume interrupted executions, then bring up the
    /// outbox publisher, the trigger worker, and the scheduler.
    pub fn start<B>(
        config: EngineConfig,
        registry: Arc<ChainRegistry>,
        stores: EngineStores,
        bus: Arc<B>,
    ) -> Self
    where
        B: EventBus<DomainEvent> + 'static,
    {
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&registry),
            Arc::clone(&stores.definitions),
            Arc::clone(&stores.executions),
            Arc::clone(&stores.ledger),
            Arc::clone(&stores.jobs),
            config.orchestrator,
        ));

        let service = ChainService::new(
            registry,
            Arc::clone(&stores.definitions),
            Arc::clone(&stores.executions),
            Arc::clone(&stores.ledger),
            Arc::clone(&stores.jobs),
        );

        // Resume before the workers start feeding in new work.
        recover(&orchestrator, &stores);

        let workers = vec![
            OutboxPublisher::spawn(Arc::clone(&stores.outbox), Arc::clone(&bus), config.outbox),
            TriggerWorker::spawn(&bus, Arc::clone(&orchestrator)),
            Scheduler::spawn(
                Arc::clone(&stores.jobs),
                Arc::clone(&orchestrator),
                config.scheduler,
            ),
        ];
        info!("chain engine started");

        Self {
            service,
            orchestrator,
            workers,
        }
    }

    pub fn service(&self) -> &ChainService {
        &self.service
    }

    /// For callers that need to drive executions directly.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Stop the workers. Executions already on their own threads finish;
    /// anything interrupted resumes on the next start.
    pub fn shutdown(&mut self) {
        for worker in self.workers.drain(..) {
            worker.shutdown();
        }
        info!("chain engine stopped");
    }
}

/// Pick up executions a previous process life left unfinished.
fn recover(orchestrator: &Arc<Orchestrator>, stores: &EngineStores) {
    match stores.executions.non_terminal() {
        Ok(unfinished) => {
            if unfinished.is_empty() {
                return;
            }
            info!(count = unfinished.len(), "resuming interrupted executions");
            for execution in unfinished {
                spawn_run(Arc::clone(orchestrator), execution);
            }
        }
        Err(err) => {
            warn!(error = ?err, "could not scan for interrupted executions");
        }
    }
}
