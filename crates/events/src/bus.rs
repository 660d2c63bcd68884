//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport layer** for events after they have been
//! persisted: feature modules write to the outbox first, the outbox consumer
//! publishes here, and engine workers subscribe. It is intentionally
//! lightweight:
//!
//! - **Transport-agnostic**: works with in-memory channels or a broker.
//! - **At-least-once delivery**: events may be delivered multiple times;
//!   consumers must be idempotent.
//! - **No persistence**: the bus distributes, the outbox/stores remember.
//!
//! At-least-once is acceptable because every consumer downstream deduplicates
//! on `event_id` (execution creation is keyed by it).

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of all events published to the bus
/// (broadcast semantics). Subscriptions are designed for single-threaded
/// consumption; use one per worker loop.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(event) => process(event),
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue, // check shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break, // bus closed
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail (e.g. a broker-backed implementation losing its
/// connection). Failures surface to the caller; the outbox consumer keeps the
/// entry unpublished and retries, so a failed publish never loses an event.
///
/// Implementations must be safe to share across threads; multiple threads may
/// publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
