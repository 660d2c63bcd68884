//! Family notifications with retraction support.

pub mod module;
pub mod notification;

pub use module::bundle;
pub use notification::{Notification, NotificationService};
