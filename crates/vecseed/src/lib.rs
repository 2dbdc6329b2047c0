pub mod activity;
pub mod client;
pub mod config;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod provision;
pub mod readiness;
pub mod report;
pub mod schema;
pub mod topology;

/// Test utilities for unit and integration testing.
/// Only available with cfg(test) or feature "testing".
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::{ClientError, MilvusClient, VectorDbClient};
pub use config::SeedConfig;
pub use error::{Outcome, SeedError};
pub use pipeline::{Pipeline, RunSummary, Stage};
pub use report::{Report, SummaryReporter};
