//! Event store trait and related types.
//!
//! The event store is the append-only log every aggregate is written to. It
//! provides exactly what the command and query sides need:
//!
//! - push a batch of events for one aggregate, guarded by optimistic
//!   concurrency on the aggregate's sequence,
//! - filter committed events with a [`SearchQueryBuilder`],
//! - read an aggregate's current sequence.
//!
//! # Implementations
//!
//! - `PostgresEventStore` (in `sourced-iam-postgres`): production implementation
//! - `InMemoryEventStore` (in `sourced-iam-testing`): fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use sourced_iam_core::aggregate::{Aggregate, Sequence};
//! use sourced_iam_core::event::PendingEvent;
//! use sourced_iam_core::event_store::{EventStore, EventStoreError};
//! use sourced_iam_core::search::{SearchQuery, SearchQueryBuilder};
//! use serde_json::json;
//!
//! async fn example(store: &dyn EventStore) -> Result<(), EventStoreError> {
//!     let org = Aggregate::new("INSTANCE", "org", "org-1", "org-1");
//!     let event = PendingEvent::new(org, "org.added", "admin", json!({"name": "ACME"}));
//!
//!     // First write to a fresh aggregate expects sequence 0.
//!     let stored = store.push(Some(Sequence::INITIAL), vec![event]).await?;
//!     assert_eq!(stored[0].sequence, Sequence::new(1));
//!
//!     let query = SearchQueryBuilder::new("INSTANCE")
//!         .add_query(SearchQuery::new().aggregate_types(["org"]).aggregate_ids(["org-1"]));
//!     let events = store.filter(query).await?;
//!     assert_eq!(events.len(), 1);
//!     Ok(())
//! }
//! ```

use crate::aggregate::{AggregateKey, AggregateType, Sequence};
use crate::event::{PendingEvent, StoredEvent};
use crate::search::SearchQueryBuilder;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by [`EventStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventStoreError>> + Send + 'a>>;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the aggregate moved past the expected
    /// sequence.
    ///
    /// Another writer committed events for the same aggregate between the
    /// caller's read and its push. Reload and retry.
    #[error("Concurrency conflict on {aggregate}: expected sequence {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate where the conflict occurred.
        aggregate: AggregateKey,
        /// The sequence the caller expected.
        expected: Sequence,
        /// The actual current sequence.
        actual: Sequence,
    },

    /// The batch is empty or spans more than one aggregate.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The caller's deadline passed before the operation completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

impl EventStoreError {
    /// Whether retrying the whole operation (after reloading) can succeed.
    ///
    /// Conflicts and transport errors are transient; everything else is not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::DatabaseError(_)
        )
    }
}

/// Event store abstraction: the append-only aggregate event log.
///
/// # Guarantees
///
/// - Sequences of an aggregate start at 1 and increase by exactly 1 per event.
/// - A push is all-or-nothing: either every event is committed, or none is.
/// - For a given expected sequence, at most one concurrent push commits.
/// - Global positions increase in commit order.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// to enable trait object usage (`Arc<dyn EventStore>`), which the command
/// pipeline and the projection manager hold.
pub trait EventStore: Send + Sync {
    /// Append a batch of events to a single aggregate.
    ///
    /// # Optimistic Concurrency
    ///
    /// - `Some(sequence)`: assert the aggregate is currently at this sequence
    /// - `None`: append regardless of the current sequence (privileged use)
    ///
    /// # Returns
    ///
    /// The committed events with sequence, position and timestamp assigned,
    /// in push order.
    ///
    /// # Errors
    ///
    /// - `InvalidBatch`: empty batch or events for several aggregates
    /// - `ConcurrencyConflict`: sequence mismatch
    /// - `DatabaseError`: database connection or query failed
    /// - `SerializationError`: payload could not be encoded
    fn push(
        &self,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> StoreFuture<'_, Vec<StoredEvent>>;

    /// Read committed events selected by `query`.
    ///
    /// Results are ordered as the query requests; by default by
    /// `(aggregate id, sequence)` ascending.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: database connection or query failed
    /// - `SerializationError`: a stored row could not be decoded
    fn filter(&self, query: SearchQueryBuilder) -> StoreFuture<'_, Vec<StoredEvent>>;

    /// Current sequence of an aggregate ([`Sequence::INITIAL`] if it has no
    /// events).
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: database connection or query failed
    fn latest_sequence(&self, aggregate: AggregateKey) -> StoreFuture<'_, Sequence>;
}

/// Check that a batch is non-empty and targets exactly one aggregate.
///
/// Shared by every [`EventStore`] implementation.
///
/// # Errors
///
/// Returns [`EventStoreError::InvalidBatch`] otherwise.
pub fn validate_batch(events: &[PendingEvent]) -> Result<AggregateKey, EventStoreError> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidBatch(
            "cannot push an empty batch".to_string(),
        ));
    };
    let key = first.key();
    if let Some(other) = events.iter().map(PendingEvent::key).find(|k| *k != key) {
        return Err(EventStoreError::InvalidBatch(format!(
            "batch mixes aggregates {key} and {other}"
        )));
    }
    Ok(key)
}

/// Convenience constructor for an [`AggregateKey`].
#[must_use]
pub fn aggregate_key(
    instance_id: impl Into<String>,
    aggregate_type: impl Into<AggregateType>,
    aggregate_id: impl Into<String>,
) -> AggregateKey {
    AggregateKey {
        instance_id: instance_id.into(),
        aggregate_type: aggregate_type.into(),
        aggregate_id: aggregate_id.into(),
    }
}
