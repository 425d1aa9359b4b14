//! Shared types, configuration, and the ingestion bus.
//!
//! Every other crate in the workspace depends on this one; it must stay
//! free of I/O beyond the bounded message bus.

pub mod bus;
pub mod config;
pub mod error;
pub mod types;
