//! # genrelay core
//!
//! Shared types and traits for genrelay: the provider abstraction, the
//! ordered fallback dispatcher, configuration, and the progress store.
//! This crate is the foundation — the hub and CLI depend on it.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod progress;
pub mod provider;
