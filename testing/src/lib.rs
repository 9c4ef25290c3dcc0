//! # Sourced IAM Testing
//!
//! Testing utilities for the event-sourced IAM engine.
//!
//! This crate provides:
//! - [`InMemoryEventStore`]: a deterministic [`EventStore`] implementation
//! - [`InMemoryProjectionStore`] and [`InMemoryFailedEvents`] for projections
//! - [`ProjectionTestHarness`]: apply events through a projection and assert rows
//! - [`FixedClock`] / [`test_clock`] and [`SequentialIdGenerator`]
//! - [`fixtures::EventBuilder`] for committed events
//!
//! ## Example
//!
//! ```ignore
//! use sourced_iam_testing::InMemoryEventStore;
//!
//! #[tokio::test]
//! async fn adds_policy() {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let commands = Commands::new(store.clone(), secret_crypto());
//!     let ctx = CommandContext::new("INSTANCE", "admin");
//!
//!     commands
//!         .add_default_password_complexity_policy(&ctx, policy)
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(store.len(), 1);
//! }
//! ```
//!
//! [`EventStore`]: sourced_iam_core::event_store::EventStore

use chrono::{DateTime, Utc};
use sourced_iam_core::environment::{Clock, IdGenerator};

mod event_store;
pub mod fixtures;
mod projection_mocks;

pub use event_store::InMemoryEventStore;
pub use projection_mocks::{
    FailedEventRecord, InMemoryFailedEvents, InMemoryProjectionStore, ProjectionTestHarness, Row,
};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use sourced_iam_testing::mocks::FixedClock;
    /// use sourced_iam_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Id generator returning `"{prefix}-1"`, `"{prefix}-2"`, ...
    ///
    /// # Example
    ///
    /// ```
    /// use sourced_iam_testing::mocks::SequentialIdGenerator;
    /// use sourced_iam_core::environment::IdGenerator;
    ///
    /// let ids = SequentialIdGenerator::new("idp");
    /// assert_eq!(ids.next_id(), "idp-1");
    /// assert_eq!(ids.next_id(), "idp-2");
    /// ```
    #[derive(Debug)]
    pub struct SequentialIdGenerator {
        prefix: String,
        counter: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Create a generator with the given prefix.
        #[must_use]
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                counter: AtomicU64::new(0),
            }
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> String {
            let next = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{next}", self.prefix)
        }
    }
}

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it. Honours
/// `RUST_LOG`, defaulting to `debug` for the workspace crates.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sourced_iam=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, SequentialIdGenerator, test_clock};
