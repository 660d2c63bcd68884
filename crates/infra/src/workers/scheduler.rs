use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use hearth_events::DomainEvent;

use crate::orchestrator::Orchestrator;
use crate::stores::ScheduledJobStore;
use crate::workers::{WorkerHandle, spawn_run};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Most jobs claimed per poll.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            batch_size: 32,
        }
    }
}

impl SchedulerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Polls the job store and turns each due job into a synthetic trigger.
///
/// The job id becomes the event id, so a job that fires twice (crash between
/// claim and dispatch) still creates at most one execution per definition.
/// Recurring jobs enqueue their next occurrence as part of the same tick.
#[derive(Debug)]
pub struct Scheduler;

impl Scheduler {
    pub fn spawn(
        jobs: Arc<dyn ScheduledJobStore>,
        orchestrator: Arc<Orchestrator>,
        config: SchedulerConfig,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("chain-scheduler".to_string())
            .spawn(move || {
                loop {
                    // Waiting on the shutdown channel doubles as the poll timer.
                    match shutdown_rx.recv_timeout(config.poll_interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            tick(&jobs, &orchestrator, config.batch_size);
                        }
                    }
                }
            })
            .expect("failed to spawn scheduler thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn tick(jobs: &Arc<dyn ScheduledJobStore>, orchestrator: &Arc<Orchestrator>, batch_size: usize) {
    let now = Utc::now();
    let due = match jobs.claim_due(now, batch_size) {
        Ok(due) => due,
        Err(err) => {
            warn!(error = ?err, "scheduler could not claim due jobs");
            return;
        }
    };

    for job in due {
        let event = DomainEvent::new(
            Uuid::from(job.id),
            job.family_id,
            job.trigger.event_type.clone(),
            job.trigger.entity_type.clone(),
            job.trigger.entity_id,
            job.trigger.payload.clone(),
            job.fire_at,
        );
        info!(job = %job.id, trigger = %job.trigger.event_type, "scheduled job fired");

        match orchestrator.activate(&event, job.only_definition) {
            Ok(executions) => {
                for execution in executions {
                    spawn_run(Arc::clone(orchestrator), execution);
                }
            }
            Err(err) => {
                warn!(job = %job.id, error = ?err, "scheduled job activation failed");
            }
        }

        if let Some(next) = job.next_occurrence(now) {
            if let Err(err) = jobs.enqueue(next) {
                warn!(job = %job.id, error = ?err, "could not enqueue the next occurrence");
            }
        }
    }
}
