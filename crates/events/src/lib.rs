//! Domain events and the mechanics that move them around.
//!
//! Feature modules raise [`DomainEvent`]s, stage them through an
//! [`OutboxWriter`], and the chain engine consumes them from an [`EventBus`].

pub mod bus;
pub mod event;
pub mod family;
pub mod in_memory_bus;
pub mod outbox;

pub use bus::{EventBus, Subscription};
pub use event::DomainEvent;
pub use family::FamilyScoped;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use outbox::{OutboxEntry, OutboxError, OutboxStatus, OutboxWriter};
