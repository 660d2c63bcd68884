use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, warn};

use hearth_events::{DomainEvent, EventBus};

use crate::retry::RetryPolicy;
use crate::stores::OutboxStore;
use crate::workers::WorkerHandle;

/// Outbox publisher tuning.
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    pub poll_interval: Duration,
    /// Most entries claimed per poll.
    pub batch_size: usize,
    /// Publish attempts per entry before it is dead-lettered.
    pub retry: RetryPolicy,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 64,
            retry: RetryPolicy::exponential(
                5,
                Duration::from_millis(200),
                Duration::from_secs(30),
            ),
        }
    }
}

impl OutboxPublisherConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Publishes due outbox entries to the bus, oldest first.
///
/// Delivery is at-least-once: a crash between publish and mark redelivers
/// the entry, and consumers dedup on the event id. Entries whose publish
/// keeps failing back off per the retry policy and are dead-lettered once
/// the budget is spent. Run one publisher per outbox store.
#[derive(Debug)]
pub struct OutboxPublisher;

impl OutboxPublisher {
    pub fn spawn<B>(
        outbox: Arc<dyn OutboxStore>,
        bus: Arc<B>,
        config: OutboxPublisherConfig,
    ) -> WorkerHandle
    where
        B: EventBus<DomainEvent> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("outbox-publisher".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(config.poll_interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => drain(&*outbox, &bus, &config),
                    }
                }
            })
            .expect("failed to spawn outbox publisher thread");

        WorkerHandle::new(shutdown_tx, join)
    }
}

fn drain<B>(outbox: &dyn OutboxStore, bus: &B, config: &OutboxPublisherConfig)
where
    B: EventBus<DomainEvent>,
{
    let batch = match outbox.claim_batch(Utc::now(), config.batch_size) {
        Ok(batch) => batch,
        Err(err) => {
            warn!(error = ?err, "outbox publisher could not read the queue");
            return;
        }
    };

    for entry in batch {
        match bus.publish(entry.event.clone()) {
            Ok(()) => {
                if let Err(err) = outbox.mark_published(entry.id) {
                    warn!(entry = %entry.id, error = ?err, "published entry could not be marked");
                }
            }
            Err(err) => {
                let message = format!("{err:?}");
                let attempt = entry.attempts + 1;
                if config.retry.should_retry(attempt) {
                    let backoff = config.retry.delay_for_attempt(attempt);
                    let retry_at =
                        Utc::now() + chrono::Duration::from_std(backoff).unwrap_or_default();
                    warn!(
                        entry = %entry.id,
                        attempt,
                        error = %message,
                        "publish failed; backing off"
                    );
                    if let Err(err) = outbox.mark_failed(entry.id, &message, retry_at) {
                        warn!(entry = %entry.id, error = ?err, "failed entry could not be marked");
                    }
                } else {
                    error!(
                        entry = %entry.id,
                        attempts = attempt,
                        error = %message,
                        "publish failed; dead-lettering"
                    );
                    if let Err(err) = outbox.dead_letter(entry.id, &message) {
                        warn!(entry = %entry.id, error = ?err, "entry could not be dead-lettered");
                    }
                }
            }
        }
    }
}
