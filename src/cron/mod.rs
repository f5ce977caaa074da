//! Periodic background jobs.

mod scheduler;

pub use scheduler::CollectionScheduler;
