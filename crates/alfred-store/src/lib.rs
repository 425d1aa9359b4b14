//! Persistence layer: schema, versioned migrations, and all row access.
//!
//! Every query that touches user-owned rows filters by `user_id`; the
//! public API makes it impossible to reach another user's data. Status
//! transitions for events and reminders are guarded in SQL so the DAG
//! cannot be bypassed by a racing writer.

pub mod channels;
pub mod crypto;
pub mod error;
pub mod events;
pub mod messages;
pub mod messaging;
mod migrations;
pub mod processed;
pub mod reminders;
pub mod sessions;
pub mod store;
pub mod tokens;
pub mod traces;
pub mod users;

pub use error::{Result, StoreError};
pub use store::Store;
