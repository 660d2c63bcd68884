//! Household tasks module.
//!
//! Owns checklists, raises `tasks.*` events, and contributes the tasks
//! triggers and actions to the chain engine.

pub mod checklist;
pub mod module;

pub use checklist::{Checklist, ChecklistItem, EVENT_COMPLETED, TaskService};
pub use module::bundle;
