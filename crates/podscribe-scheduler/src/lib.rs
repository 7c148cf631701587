//! Job Lifecycle Controller (component E) and Prefetch & Batch Scheduler
//! (component F): per-message processing and the sliding-window batching
//! loop built on top of it.

mod lifecycle;
mod scheduler;

pub use lifecycle::{process_message, quarantine_poison, try_claim, JobOutcome};
pub use scheduler::Scheduler;
