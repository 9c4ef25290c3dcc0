//! In-memory event store for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use sourced_iam_core::aggregate::{AggregateKey, Sequence};
use sourced_iam_core::environment::Clock;
use sourced_iam_core::event::{PendingEvent, StoredEvent};
use sourced_iam_core::event_store::{EventStore, EventStoreError, StoreFuture, validate_batch};
use sourced_iam_core::search::SearchQueryBuilder;
use std::sync::{Arc, Mutex};

use crate::mocks::test_clock;

#[derive(Debug, Default)]
struct Log {
    events: Vec<StoredEvent>,
    injected: Option<EventStoreError>,
}

/// In-memory implementation of [`EventStore`].
///
/// Pushes are serialised by a single mutex, so the sequence check and the
/// append happen atomically. Timestamps come from the injected [`Clock`].
///
/// # Example
///
/// ```
/// use sourced_iam_core::aggregate::{Aggregate, Sequence};
/// use sourced_iam_core::event::PendingEvent;
/// use sourced_iam_core::event_store::EventStore;
/// use sourced_iam_testing::InMemoryEventStore;
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let org = Aggregate::new("INSTANCE", "org", "org-1", "org-1");
///
/// let stored = store
///     .push(Some(Sequence::INITIAL), vec![PendingEvent::new(org, "org.added", "admin", json!({}))])
///     .await?;
/// assert_eq!(stored[0].position, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventStore {
    log: Arc<Mutex<Log>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventStore {
    /// Create an empty store using the fixed [`test_clock`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(test_clock()))
    }

    /// Create an empty store stamping events with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            log: Arc::new(Mutex::new(Log::default())),
            clock,
        }
    }

    /// Make the next store operation fail with `error`.
    pub fn fail_next(&self, error: EventStoreError) {
        self.log.lock().unwrap().injected = Some(error);
    }

    /// Every committed event in position order.
    #[must_use]
    pub fn events(&self) -> Vec<StoredEvent> {
        self.log.lock().unwrap().events.clone()
    }

    /// Number of committed events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().unwrap().events.len()
    }

    /// Whether no event has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.lock().unwrap().events.is_empty()
    }

    fn head(events: &[StoredEvent], key: &AggregateKey) -> Sequence {
        events
            .iter()
            .rev()
            .find(|e| e.key() == *key)
            .map_or(Sequence::INITIAL, |e| e.sequence)
    }

    fn push_now(
        &self,
        expected: Option<Sequence>,
        pending: Vec<PendingEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut log = self.log.lock().unwrap();
        if let Some(error) = log.injected.take() {
            return Err(error);
        }

        let key = validate_batch(&pending)?;
        let current = Self::head(&log.events, &key);
        if let Some(expected) = expected {
            if expected != current {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate: key,
                    expected,
                    actual: current,
                });
            }
        }

        let created_at = self.clock.now();
        let mut position = log.events.last().map_or(0, |e| e.position);
        let mut sequence = current;
        let stored: Vec<StoredEvent> = pending
            .into_iter()
            .map(|event| {
                position += 1;
                sequence = sequence.next();
                StoredEvent {
                    instance_id: event.aggregate.instance_id,
                    resource_owner: event.aggregate.resource_owner,
                    aggregate_type: event.aggregate.aggregate_type,
                    aggregate_id: event.aggregate.aggregate_id,
                    event_type: event.event_type,
                    sequence,
                    position,
                    created_at,
                    editor: event.editor,
                    payload: event.payload,
                }
            })
            .collect();

        log.events.extend(stored.iter().cloned());
        Ok(stored)
    }

    fn filter_now(&self, query: &SearchQueryBuilder) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut log = self.log.lock().unwrap();
        if let Some(error) = log.injected.take() {
            return Err(error);
        }
        Ok(query.select(&log.events))
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("events", &self.len())
            .finish_non_exhaustive()
    }
}

impl EventStore for InMemoryEventStore {
    fn push(
        &self,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(async move {
            // Yield so concurrent pushes interleave like real I/O would.
            tokio::task::yield_now().await;
            self.push_now(expected, events)
        })
    }

    fn filter(&self, query: SearchQueryBuilder) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.filter_now(&query)
        })
    }

    fn latest_sequence(&self, aggregate: AggregateKey) -> StoreFuture<'_, Sequence> {
        Box::pin(async move {
            let log = self.log.lock().unwrap();
            Ok(Self::head(&log.events, &aggregate))
        })
    }
}
