//! Remote image-processing service access.
//!
//! [`RemoteApi`] is the raw capability: upload an asset, start a job, read
//! its status, list its outputs, download a file. [`HttpRemoteApi`] binds
//! it to the hosted HTTP API with [`reqwest`]. [`RemoteJobClient`] wraps any
//! implementation with per-call timeouts, bounded retry on timeouts and
//! status normalisation, which is what the job engine talks to.
//!
//! [`HttpRemoteApi`]: api::HttpRemoteApi
//! [`RemoteJobClient`]: client::RemoteJobClient
//! [`RemoteApi`]: service::RemoteApi

pub mod api;
pub mod client;
pub mod error;
pub mod retry;
pub mod service;
