//! Observability Module
//!
//! Logging, events and metrics for issuer and claimant nodes:
//! - `metrics`: claim, membership and discovery metrics with optional Prometheus export
//! - `events`: structured event logging with consistent fields
//! - `tracing`: subscriber setup with optional OpenTelemetry export

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::init_metrics;
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
