//! scan-store: chunked upload protocol + ephemeral analysis cache.
//!
//! The server side accepts client-driven, resumable-style chunked uploads
//! with per-chunk and whole-file integrity verification, hands completed
//! files to an external analysis collaborator, and keeps raw bytes plus
//! verdicts in a bounded in-memory cache. The [`client`] module provides
//! the matching upload coordinator with retry, cancellation, and live
//! progress telemetry.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
