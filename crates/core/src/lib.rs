//! Domain types for the hubqueue job engine.
//!
//! Everything in this crate is pure: job kinds and their parameter
//! templates, the job state machine, failure classification, the
//! retry/backoff policy, progress milestones and result naming. No I/O,
//! no async runtime.

pub mod classify;
pub mod error;
pub mod job;
pub mod kind;
pub mod naming;
pub mod progress;
pub mod retry;
pub mod types;
