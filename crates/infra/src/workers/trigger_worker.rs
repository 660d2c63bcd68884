use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::warn;

use hearth_events::{DomainEvent, EventBus, Subscription};

use crate::orchestrator::Orchestrator;
use crate::workers::{WorkerHandle, spawn_run};

/// Feeds bus events into chain activation.
///
/// The bus is at-least-once; duplicate deliveries are harmless because
/// execution creation dedups on the event id.
#[derive(Debug)]
pub struct TriggerWorker;

impl TriggerWorker {
    pub fn spawn<B>(bus: &B, orchestrator: Arc<Orchestrator>) -> WorkerHandle
    where
        B: EventBus<DomainEvent>,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name("chain-trigger-worker".to_string())
            .spawn(move || worker_loop(sub, shutdown_rx, orchestrator))
            .expect("failed to spawn trigger worker thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn worker_loop(
    sub: Subscription<DomainEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    orchestrator: Arc<Orchestrator>,
) {
    let tick = Duration::from_millis(250);

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(event) => match orchestrator.activate(&event, None) {
                Ok(executions) => {
                    for execution in executions {
                        spawn_run(Arc::clone(&orchestrator), execution);
                    }
                }
                Err(err) => {
                    warn!(
                        trigger = event.event_type(),
                        error = ?err,
                        "trigger activation failed"
                    );
                }
            },
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
