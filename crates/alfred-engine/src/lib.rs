//! The event/reminder engine: bus processor, proposal state machine,
//! calendar sync worker, and the reminder due-scheduler.

pub mod error;
pub mod processor;
pub mod proposals;
pub mod router;
pub mod scheduler;
pub mod sync;
pub mod time;

pub use error::{EngineError, Result};
pub use processor::Processor;
pub use proposals::ProposalEngine;
pub use scheduler::ReminderScheduler;
pub use sync::SyncWorker;
