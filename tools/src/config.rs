//! Configuration management for `iam-admin`.
//!
//! Loads configuration from environment variables with sensible defaults:
//!
//! | Variable                           | Default                      |
//! |------------------------------------|------------------------------|
//! | `EVENTS_DATABASE_*`                | see [`PostgresConfig`]       |
//! | `PROJECTIONS_DATABASE_*`           | see [`PostgresConfig`]; URL falls back to the event store's |
//! | `IAM_PROJECTION_BATCH_SIZE`        | `200`                        |
//! | `IAM_PROJECTION_POLL_INTERVAL_MS`  | `500`                        |
//! | `IAM_EXPORT_PAGE_SIZE`             | `1000`                       |

use sourced_iam_postgres::config::{ConfigError, PostgresConfig, parse_var};
use std::time::Duration;

const EVENTS_PREFIX: &str = "EVENTS_DATABASE";
const PROJECTIONS_PREFIX: &str = "PROJECTIONS_DATABASE";

/// Complete admin configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminConfig {
    /// Event log database.
    pub events: PostgresConfig,
    /// Projection database (may be the same as `events`).
    pub projections: PostgresConfig,
    /// Events per projection tick.
    pub batch_size: u64,
    /// Pause between projection ticks once caught up.
    pub poll_interval: Duration,
    /// Events fetched per export page.
    pub export_page_size: u64,
}

impl AdminConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let events = PostgresConfig::from_lookup(EVENTS_PREFIX, &lookup)?;
        let mut projections = PostgresConfig::from_lookup(PROJECTIONS_PREFIX, &lookup)?;
        if lookup(&format!("{PROJECTIONS_PREFIX}_URL")).is_none() {
            projections.url.clone_from(&events.url);
        }

        let poll_interval_ms = parse_var(&lookup, "IAM_PROJECTION", "POLL_INTERVAL_MS", 500u64)?;

        Ok(Self {
            events,
            projections,
            batch_size: parse_var(&lookup, "IAM_PROJECTION", "BATCH_SIZE", 200u64)?.max(1),
            poll_interval: Duration::from_millis(poll_interval_ms),
            export_page_size: parse_var(&lookup, "IAM_EXPORT", "PAGE_SIZE", 1000u64)?.max(1),
        })
    }

    /// Whether projections share the event log's database.
    #[must_use]
    pub fn shared_database(&self) -> bool {
        self.events.url == self.projections.url
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_share_one_database() {
        let config = AdminConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.shared_database());
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.export_page_size, 1000);
    }

    #[test]
    fn projection_url_follows_event_store_unless_set() {
        let config =
            AdminConfig::from_lookup(lookup(&[("EVENTS_DATABASE_URL", "postgres://db/events")])).unwrap();
        assert_eq!(config.projections.url, "postgres://db/events");

        let config = AdminConfig::from_lookup(lookup(&[
            ("EVENTS_DATABASE_URL", "postgres://db/events"),
            ("PROJECTIONS_DATABASE_URL", "postgres://db/read"),
            ("PROJECTIONS_DATABASE_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();
        assert!(!config.shared_database());
        assert_eq!(config.projections.max_connections, 4);
        assert_eq!(config.events.max_connections, 10);
    }

    #[test]
    fn projection_tuning() {
        let config = AdminConfig::from_lookup(lookup(&[
            ("IAM_PROJECTION_BATCH_SIZE", "0"),
            ("IAM_PROJECTION_POLL_INTERVAL_MS", "25"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(25));

        assert!(AdminConfig::from_lookup(lookup(&[("IAM_EXPORT_PAGE_SIZE", "lots")])).is_err());
    }
}
