//! Family calendar module.
//!
//! Owns calendar entries, raises `calendar.*` events, and contributes the
//! calendar triggers and actions to the chain engine. Pure domain plus
//! in-memory state; no IO.

pub mod entry;
pub mod module;

pub use entry::{CalendarEntry, CalendarService, EVENT_CREATED, EVENT_REMINDER_DUE};
pub use module::bundle;
