//! Per-user ingestion clients and their lifecycle.
//!
//! The WhatsApp/Telegram protocol stacks are external sidecar processes;
//! [`bridge::BridgeTransport`] is their interface boundary. The manager
//! owns one client per (user, source) and never holds its lock across
//! network I/O.

pub mod bridge;
pub mod client;
pub mod error;
pub mod manager;
pub mod session_store;
pub mod sink;

pub use error::{ClientError, Result};
pub use manager::ClientManager;
pub use sink::SourceEventSink;
