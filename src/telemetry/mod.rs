//! Global `tracing` subscriber setup for the indexer binary and embedders.

pub mod config;
pub mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{TelemetryGuard, init_telemetry};
