//! Google API clients: OAuth token flows, Calendar v3 event CRUD, and the
//! Gmail REST surface the poller consumes.

pub mod error;
pub mod gcal;
pub mod gmail;
pub mod oauth;

pub use error::{GoogleError, Result};
