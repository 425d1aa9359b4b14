//! User-facing delivery: push + email provider clients, and the per-user
//! event broadcaster that feeds the SSE stream.

pub mod broadcast;
pub mod email;
pub mod error;
pub mod notifier;
pub mod push;

pub use broadcast::{EventBroadcaster, UserEvent};
pub use error::{NotifyError, Result};
pub use notifier::Notifier;
