//! `hearth-infra` — the running half of the chain engine.
//!
//! `hearth-chains` defines what chains are; this crate makes them go:
//! stores for definitions, executions, the ledger, jobs, and the outbox,
//! the orchestrator that drives executions, the workers that feed it, and
//! the family-facing service. [`ChainEngine`] wires all of it together.

pub mod engine;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod stores;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use engine::{ChainEngine, EngineConfig, EngineStores};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use service::{ChainService, ExecutionDetail, ServiceError};
pub use stores::{
    DefinitionStore, ExecutionStore, InMemoryDefinitionStore, InMemoryExecutionStore,
    InMemoryJobStore, InMemoryLedger, InMemoryOutbox, InsertOutcome, LedgerStore, OutboxStore,
    ScheduledJobStore, StoreError,
};
pub use workers::{
    OutboxPublisher, OutboxPublisherConfig, Scheduler, SchedulerConfig, TriggerWorker,
    WorkerHandle,
};
