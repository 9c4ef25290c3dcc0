//! Projection contracts for building read models from the event log.
//!
//! # Overview
//!
//! Projections are the query side: they turn committed events into
//! denormalised, indexed rows that read APIs can join and paginate.
//!
//! - **Projection**: a name, the events it is interested in, and a
//!   [`ProjectionReducers`] table mapping event types to row mutations
//! - **Row mutation**: a storage-agnostic upsert/update/delete
//!   ([`RowMutation`])
//! - **Projection store**: applies the mutations of one event together with
//!   the new checkpoint, atomically
//! - **Checkpoint**: the last global position a projection has applied
//!
//! ```text
//! events table ──poll(position > checkpoint)──▶ ProjectionReducers
//!                                                   │ Vec<RowMutation>
//!                                                   ▼
//!                                    ProjectionStore::apply (one tx)
//!                                    ├── org_members / users_humans / ...
//!                                    └── projection_checkpoints
//! ```
//!
//! Reducers are pure: the same event always yields the same mutations, so
//! re-applying an event after a crash converges to the same rows.

use crate::aggregate::AggregateType;
use crate::event::{Event, EventError, StoredEvent};
use crate::search::{SearchQuery, SearchQueryBuilder};
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Event processing error
    #[error("Event processing error: {0}")]
    EventProcessing(String),

    /// Reading the event log failed
    #[error("Event store error: {0}")]
    EventStore(String),
}

impl From<EventError> for ProjectionError {
    fn from(error: EventError) -> Self {
        Self::EventProcessing(error.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Boxed future used by the dyn-compatible projection storage traits.
pub type ProjectionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A typed column value.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnValue {
    /// SQL `NULL`.
    Null,
    /// Text.
    Text(String),
    /// 64-bit integer.
    Int(i64),
    /// Boolean.
    Bool(bool),
    /// Text array.
    TextArray(Vec<String>),
    /// Timestamp with time zone.
    Timestamp(DateTime<Utc>),
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for ColumnValue {
    fn from(value: Vec<String>) -> Self {
        Self::TextArray(value)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// A named column with its value.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Column value.
    pub value: ColumnValue,
}

impl Column {
    /// Create a column.
    #[must_use]
    pub fn new(name: &'static str, value: impl Into<ColumnValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A storage-agnostic change to one projection table.
///
/// `key` columns identify rows (always including `instance_id`); `values` are
/// the columns written.
#[derive(Clone, Debug, PartialEq)]
pub enum RowMutation {
    /// Insert the row, or overwrite `values` if a row with `key` exists.
    Upsert {
        /// Target table.
        table: &'static str,
        /// Identity columns.
        key: Vec<Column>,
        /// Written columns.
        values: Vec<Column>,
    },
    /// Update `values` of every row matching `key`; no-op if none matches.
    Update {
        /// Target table.
        table: &'static str,
        /// Row filter.
        key: Vec<Column>,
        /// Written columns.
        values: Vec<Column>,
    },
    /// Delete every row matching `key`.
    Delete {
        /// Target table.
        table: &'static str,
        /// Row filter.
        key: Vec<Column>,
    },
}

impl RowMutation {
    /// Table this mutation targets.
    #[must_use]
    pub const fn table(&self) -> &'static str {
        match self {
            Self::Upsert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => {
                table
            }
        }
    }

    /// Identity columns of this mutation.
    #[must_use]
    pub fn key(&self) -> &[Column] {
        match self {
            Self::Upsert { key, .. } | Self::Update { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

type ProjectFn = Box<dyn Fn(&StoredEvent) -> Result<Vec<RowMutation>> + Send + Sync>;

/// Registry from event-type tag to a handler producing row mutations.
pub struct ProjectionReducers {
    handlers: HashMap<&'static str, ProjectFn>,
}

impl ProjectionReducers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for the typed event `E`.
    #[must_use]
    pub fn on<E: Event>(self, project: fn(&StoredEvent, E) -> Result<Vec<RowMutation>>) -> Self {
        self.on_type(E::EVENT_TYPE, project)
    }

    /// Register a handler for `event_type`, decoding the payload as `P`.
    #[must_use]
    pub fn on_type<P>(
        mut self,
        event_type: &'static str,
        project: fn(&StoredEvent, P) -> Result<Vec<RowMutation>>,
    ) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.handlers.insert(
            event_type,
            Box::new(move |event| {
                let payload = event.decode::<P>()?;
                project(event, payload)
            }),
        );
        self
    }

    /// Register a handler that only needs event metadata.
    #[must_use]
    pub fn on_stored(
        mut self,
        event_type: &'static str,
        project: fn(&StoredEvent) -> Result<Vec<RowMutation>>,
    ) -> Self {
        self.handlers
            .insert(event_type, Box::new(move |event| project(event)));
        self
    }

    /// Whether a handler is registered for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Mutations for `event`; empty for unregistered event types.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::EventProcessing`] if the payload cannot be
    /// decoded or the handler rejects the event.
    pub fn reduce(&self, event: &StoredEvent) -> Result<Vec<RowMutation>> {
        self.handlers
            .get(event.event_type.as_str())
            .map_or_else(|| Ok(Vec::new()), |project| project(event))
    }
}

impl Default for ProjectionReducers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProjectionReducers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionReducers")
            .field("event_types", &self.event_types())
            .finish()
    }
}

/// A projection builds and maintains read tables from events.
///
/// # Philosophy
///
/// - **Eventually Consistent**: tables lag behind the log by one poll interval
/// - **Optimized for Reads**: schema designed for query patterns, not writes
/// - **Rebuildable**: tables can be cleared and rebuilt from the log at any time
pub trait Projection: Send + Sync {
    /// Unique projection name (used for checkpointing and identification).
    fn name(&self) -> &str;

    /// Aggregate types whose events this projection reads.
    fn aggregate_types(&self) -> Vec<AggregateType>;

    /// Event dispatch table.
    fn reducers(&self) -> &ProjectionReducers;

    /// Tables owned by this projection (cleared on rebuild).
    fn tables(&self) -> &[&'static str];

    /// Search for the next batch after `position`, across every instance.
    fn query(&self, position: u64, batch_size: u64) -> SearchQueryBuilder {
        SearchQueryBuilder::system()
            .add_query(
                SearchQuery::new()
                    .aggregate_types(self.aggregate_types())
                    .event_types(self.reducers().event_types()),
            )
            .order_by_position()
            .position_after(position)
            .limit(batch_size)
    }
}

/// Storage backend for projection tables.
///
/// A store is also the checkpoint store of the projections it serves: each
/// [`ProjectionStore::apply`] commits the mutations and the new position
/// together, so a crash never leaves rows ahead of (or behind) the checkpoint.
pub trait ProjectionStore: ProjectionCheckpoint {
    /// Apply the mutations of one event and advance the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the transaction fails; nothing
    /// is applied in that case.
    fn apply(
        &self,
        projection_name: &str,
        mutations: Vec<RowMutation>,
        position: EventPosition,
    ) -> ProjectionFuture<'_, ()>;

    /// Remove every row of `tables` and the projection's checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if clearing fails.
    fn clear(
        &self,
        projection_name: &str,
        tables: Vec<&'static str>,
    ) -> ProjectionFuture<'_, ()>;
}

/// Checkpoint tracking for projection progress through the event log.
///
/// Checkpoints allow projections to resume from where they left off after
/// restarts, crashes, or rebuilds.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `impl Future`
/// to enable trait object usage (`Arc<dyn ProjectionCheckpoint>`).
pub trait ProjectionCheckpoint: Send + Sync {
    /// Save the current position in the event log.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if save fails.
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> ProjectionFuture<'_, ()>;

    /// Load the last saved position for a projection.
    ///
    /// # Returns
    ///
    /// - `Some(position)` if checkpoint exists
    /// - `None` if this is a new projection (start from beginning)
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if load fails.
    fn load_position(&self, projection_name: &str) -> ProjectionFuture<'_, Option<EventPosition>>;
}

/// Sink for events a projection could not apply.
///
/// The materializer records the event and moves on, so one bad event does not
/// stall the projection. Operators inspect and resolve entries out of band.
pub trait FailedEventSink: Send + Sync {
    /// Record a failed event.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if recording fails.
    fn record(
        &self,
        projection_name: &str,
        event: &StoredEvent,
        error: &str,
    ) -> ProjectionFuture<'_, ()>;
}

/// Position in the event log (for checkpoint resumption).
///
/// # Example
///
/// ```
/// use sourced_iam_core::projection::EventPosition;
/// use chrono::Utc;
///
/// let position = EventPosition {
///     offset: 1000,
///     timestamp: Utc::now(),
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPosition {
    /// Global position of the last applied event.
    pub offset: u64,

    /// Creation date of the last applied event.
    pub timestamp: DateTime<Utc>,
}

impl EventPosition {
    /// Create a new event position.
    ///
    /// # Example
    ///
    /// ```
    /// use sourced_iam_core::projection::EventPosition;
    /// use chrono::Utc;
    ///
    /// let position = EventPosition::new(1000, Utc::now());
    /// ```
    #[must_use]
    pub const fn new(offset: u64, timestamp: DateTime<Utc>) -> Self {
        Self { offset, timestamp }
    }

    /// Position right after `event`.
    #[must_use]
    pub const fn of(event: &StoredEvent) -> Self {
        Self {
            offset: event.position,
            timestamp: event.created_at,
        }
    }
}
