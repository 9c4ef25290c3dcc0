//! `PostgreSQL` event store implementation for Sourced IAM.
//!
//! This crate provides the production event log implementing the
//! `EventStore` trait from `sourced-iam-core`. It uses sqlx and supports:
//!
//! - Event persistence with per-aggregate optimistic concurrency
//! - Search translation (`SearchQueryBuilder` to SQL, JSONB payload predicates)
//! - Connection pooling configured from the environment
//!
//! # Example
//!
//! ```no_run
//! use sourced_iam_postgres::{PostgresConfig, PostgresEventStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PostgresConfig::from_env("EVENTS_DATABASE")?;
//! let event_store = PostgresEventStore::from_config(&config).await?;
//! event_store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod event_store;

pub use config::{ConfigError, PostgresConfig};
pub use event_store::PostgresEventStore;
