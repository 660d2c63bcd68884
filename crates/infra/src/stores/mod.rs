//! Durable state behind the chain engine.
//!
//! ## Design
//!
//! Every store is a trait so the engine wires against contracts rather than
//! backends; the in-memory implementations cover tests and single-process
//! deployments. Keyed reads take the calling family and treat a cross-family
//! hit as an error, not a miss.
//!
//! ## Components
//!
//! - [`DefinitionStore`]: chain definitions, queried by trigger at activation
//! - [`ExecutionStore`]: executions and their per-step records
//! - [`LedgerStore`]: the append-only entity-mapping ledger
//! - [`ScheduledJobStore`]: delayed and recurring trigger jobs
//! - [`OutboxStore`]: staged events awaiting publication

pub mod definition_store;
pub mod execution_store;
pub mod job_store;
pub mod ledger_store;
pub mod outbox_store;

pub use definition_store::{DefinitionStore, InMemoryDefinitionStore};
pub use execution_store::{ExecutionStore, InMemoryExecutionStore, InsertOutcome};
pub use job_store::{InMemoryJobStore, ScheduledJobStore};
pub use ledger_store::{InMemoryLedger, LedgerStore};
pub use outbox_store::{InMemoryOutbox, OutboxStore};

/// Store error common to the engine's stores.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("family isolation violation")]
    FamilyIsolation,
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("record is terminal: {0}")]
    Terminal(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub(crate) fn poisoned() -> Self {
        Self::Storage("store lock poisoned".to_string())
    }
}
