//! Ingestion: raw source events → channel rows → normalized messages on
//! the shared bus, plus the history-sync pass and the Gmail poll worker.

pub mod debounce;
pub mod error;
pub mod gmail_poller;
pub mod history;
pub mod ingestor;

pub use debounce::{BackfillHook, HistoryDebouncer};
pub use error::{IngestError, Result};
pub use gmail_poller::GmailPoller;
pub use ingestor::Ingestor;
