//! HTTP API server for pallet.
//!
//! This crate provides the HTTP boundary of the ingestion pipeline:
//! - Upload session open/resume, append, abort and status
//! - Finalize (import) with checksum verification
//! - Content lookup and download
//! - Health, status and Prometheus metrics
//! - Background reaping of expired sessions

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod reaper;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
