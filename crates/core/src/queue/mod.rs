//! Admission-controlled run queue.
//!
//! Enforces a global in-flight cap and a per-submitter cap, keeps a
//! priority-then-FIFO backlog, times out stuck runs and retries transient
//! dispatch failures a bounded number of times.

mod admission;
mod config;
mod types;

pub use admission::AdmissionQueue;
pub use config::QueueConfig;
pub use types::*;
