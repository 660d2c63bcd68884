//! Background workers of the chain engine.
//!
//! ## Components
//!
//! - [`TriggerWorker`]: subscribes to the event bus and activates matching
//!   definitions for every event
//! - [`Scheduler`]: polls the job store and fires due jobs as synthetic
//!   trigger events
//! - [`OutboxPublisher`]: drains staged events from the outbox onto the bus
//!
//! Workers are plain threads with a shutdown channel; a [`WorkerHandle`]
//! controls each one.

mod outbox_publisher;
mod scheduler;
mod trigger_worker;

pub use outbox_publisher::{OutboxPublisher, OutboxPublisherConfig};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use trigger_worker::TriggerWorker;

use std::sync::{Arc, mpsc};
use std::thread;

use tracing::error;

use hearth_chains::ChainExecution;

use crate::orchestrator::Orchestrator;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            shutdown,
            join: Some(join),
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Run one execution on its own thread. Executions are independent of each
/// other, so none of them queues behind a slow sibling.
pub(crate) fn spawn_run(orchestrator: Arc<Orchestrator>, execution: ChainExecution) {
    let execution_id = execution.id();
    let spawned = thread::Builder::new()
        .name(format!("chain-execution-{execution_id}"))
        .spawn(move || {
            if let Err(err) = orchestrator.run(execution) {
                error!(execution = %execution_id, error = ?err, "chain execution aborted");
            }
        });
    if let Err(err) = spawned {
        error!(execution = %execution_id, error = ?err, "failed to spawn chain execution thread");
    }
}
