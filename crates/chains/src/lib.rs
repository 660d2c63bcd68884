//! `hearth-chains` — the event-chain automation domain.
//!
//! A chain definition couples one trigger event type to an ordered list of
//! action steps. Executions run the steps strictly in order, record what
//! each step created in the entity-mapping ledger, and compensate applied
//! steps in reverse when a later step fails.
//!
//! This crate holds the pure domain: registry, definitions, executions,
//! templates, schedules. Stores and the orchestrator live in `hearth-infra`.

pub mod action;
pub mod definition;
pub mod execution;
pub mod id;
pub mod ledger;
pub mod mapping;
pub mod registry;
pub mod schedule;

pub use action::{
    ActionContext, ActionFailure, ActionHandler, ActionSuccess, CompensationContext,
    CompensationFailure, CreatedEntity, ScheduleRequest,
};
pub use definition::{ChainDefinition, ChainStep, DefinitionError};
pub use execution::{
    ChainExecution, ExecutionErrorSummary, ExecutionState, StepExecution, StepState,
};
pub use id::{ChainDefinitionId, ChainExecutionId, ScheduledJobId};
pub use ledger::EntityMapping;
pub use mapping::{TemplateError, TemplateInputs};
pub use registry::{
    ActionDescriptor, ActionKey, ChainRegistry, ChainRegistryBuilder, ModuleBundle, RegistryError,
    TriggerDescriptor,
};
pub use schedule::{ScheduledJob, ScheduledJobStatus, SyntheticTrigger};
