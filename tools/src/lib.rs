//! Operator tooling for the event-sourced IAM engine.
//!
//! The `iam-admin` binary wraps these modules:
//!
//! - `cli`: clap argument definitions
//! - `config`: environment configuration for both databases
//! - `export`: dump an instance's events as JSON lines
//! - `project`: run the read-model projections until shutdown
//!
//! Database migrations are run directly through
//! [`PostgresEventStore::migrate`](sourced_iam_postgres::PostgresEventStore::migrate) and
//! [`PostgresProjectionStore::migrate`](sourced_iam_projections::PostgresProjectionStore::migrate).

use sourced_iam_core::event_store::EventStoreError;
use sourced_iam_core::projection::ProjectionError;
use sourced_iam_postgres::config::ConfigError;
use thiserror::Error;

pub mod cli;
pub mod config;
pub mod export;
pub mod project;

pub use cli::{Cli, Command};
pub use config::AdminConfig;
pub use export::export_events;
pub use project::{ProjectionStores, run_projections};

/// Errors raised by admin commands.
#[derive(Error, Debug)]
pub enum AdminError {
    /// Configuration could not be loaded or a pool could not connect.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The event log failed.
    #[error("Event store error: {0}")]
    Store(#[from] EventStoreError),

    /// A projection failed.
    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// Writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Task(String),
}
