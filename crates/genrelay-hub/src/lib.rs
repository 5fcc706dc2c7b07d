//! # genrelay hub
//!
//! HTTP-backed generation providers, the REST API server, runtime metrics,
//! request middleware, the learning-plan coach, and SQLite progress storage.

pub mod api;
pub mod learning;
pub mod metrics;
pub mod middleware;
pub mod providers;
pub mod storage;
