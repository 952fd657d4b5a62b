//! The hubqueue job engine.
//!
//! [`JobQueue`](queue::JobQueue) accepts jobs, holds them in a FIFO
//! pending list and feeds a fixed pool of workers. Each worker drives one
//! job at a time through [`JobExecutor`](executor::JobExecutor): upload
//! inputs, bind parameters, submit, poll, fetch and download outputs. Transient
//! failures are retried per job with backoff; everything else ends the job
//! as failed. Progress and lifecycle changes are published on a
//! [`JobEventBus`](events::JobEventBus) and readable as snapshots.

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod queue;
pub mod snapshot;
