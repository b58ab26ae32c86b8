pub use common::{Error, Result};

/// Command line and environment configuration
pub mod config;
pub use config::Parameters;

/// Task handler wiring the reconciler to the metrics
pub mod handler;

/// State shared with actix
pub mod manager;
pub use manager::Manager;

/// Metrics
mod metrics;
pub use metrics::Metrics;

/// HTTP routes
pub mod server;
