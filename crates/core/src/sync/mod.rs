//! Sync policy: retry classification, backoff and scheduler cadence.

mod retry;
mod scheduler;

pub use retry::*;
pub use scheduler::*;
