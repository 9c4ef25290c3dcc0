//! # Sourced IAM Core
//!
//! Core traits and types for the event-sourced IAM engine.
//!
//! This crate is pure: it defines the event model, the event store contract,
//! the search builder, the write-model framework and the projection contracts.
//! Storage implementations live in `sourced-iam-postgres` and
//! `sourced-iam-testing`.
//!
//! ## Core Concepts
//!
//! - **Aggregate**: a domain entity identified by *(instance, type, id)*
//! - **Event**: an immutable, sequenced fact about one aggregate
//! - **Event Store**: the append-only log with per-aggregate optimistic concurrency
//! - **Write Model**: typed aggregate state rebuilt from events for one command
//! - **Projection**: read tables materialised from the log
//!
//! ## Data Flow
//!
//! ```text
//! command ─▶ load write model (filter + reduce) ─▶ decide ─▶ push(expected sequence)
//!                                                               │
//!                 read tables ◀── projection manager ◀── poll ──┘
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Aggregate identity and sequence types
pub mod aggregate;

/// Event trait and pending/stored event records
pub mod event;

/// Event store trait and errors
pub mod event_store;

/// Search/filter builder for reading events
pub mod search;

/// Write-model replay framework
pub mod write_model;

/// Projection contracts (reducers, row mutations, stores, checkpoints)
pub mod projection;

/// Environment module - injected dependencies
///
/// External dependencies are abstracted behind traits so that commands and
/// projections can be tested deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use sourced_iam_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Generates identifiers for new aggregates (identity providers, ...).
    pub trait IdGenerator: Send + Sync {
        /// Produce a fresh, unique identifier.
        fn next_id(&self) -> String;
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
