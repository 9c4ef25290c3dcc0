//! In-memory projection testing utilities
//!
//! Provides fast, deterministic testing infrastructure for projections:
//! - [`InMemoryProjectionStore`]: table/row storage applying [`RowMutation`]s
//! - [`InMemoryFailedEvents`]: records events a projection could not apply
//! - [`ProjectionTestHarness`]: Fluent API for projection tests

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::projection::{
    Column, ColumnValue, EventPosition, FailedEventSink, Projection, ProjectionCheckpoint,
    ProjectionError, ProjectionFuture, ProjectionStore, Result, RowMutation,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// A stored row: column name to value.
pub type Row = BTreeMap<String, ColumnValue>;

#[derive(Debug, Default)]
struct State {
    tables: HashMap<&'static str, Vec<Row>>,
    positions: HashMap<String, EventPosition>,
    fail_next_apply: Option<String>,
}

fn row_matches(row: &Row, key: &[Column]) -> bool {
    key.iter()
        .all(|column| row.get(column.name) == Some(&column.value))
}

fn write_columns(row: &mut Row, columns: Vec<Column>) {
    for column in columns {
        row.insert(column.name.to_string(), column.value);
    }
}

fn apply_mutation(tables: &mut HashMap<&'static str, Vec<Row>>, mutation: RowMutation) {
    match mutation {
        RowMutation::Upsert { table, key, values } => {
            let rows = tables.entry(table).or_default();
            if let Some(row) = rows.iter_mut().find(|row| row_matches(row, &key)) {
                write_columns(row, values);
            } else {
                let mut row = Row::new();
                write_columns(&mut row, key);
                write_columns(&mut row, values);
                rows.push(row);
            }
        }
        RowMutation::Update { table, key, values } => {
            if let Some(rows) = tables.get_mut(table) {
                for row in rows.iter_mut().filter(|row| row_matches(row, &key)) {
                    write_columns(row, values.clone());
                }
            }
        }
        RowMutation::Delete { table, key } => {
            if let Some(rows) = tables.get_mut(table) {
                rows.retain(|row| !row_matches(row, &key));
            }
        }
    }
}

/// In-memory projection store for fast, deterministic testing.
///
/// Tables are lists of rows; mutations and checkpoints are applied under one
/// lock, mirroring the single transaction of the Postgres store.
///
/// # Example
///
/// ```
/// use sourced_iam_testing::InMemoryProjectionStore;
/// use sourced_iam_core::projection::{Column, EventPosition, ProjectionStore, RowMutation};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryProjectionStore::new();
///
/// let upsert = RowMutation::Upsert {
///     table: "org_members",
///     key: vec![Column::new("instance_id", "i1"), Column::new("user_id", "u1")],
///     values: vec![Column::new("roles", vec!["ORG_OWNER".to_string()])],
/// };
/// store.apply("org_members", vec![upsert], EventPosition::new(1, Utc::now())).await?;
///
/// assert_eq!(store.rows("org_members").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryProjectionStore {
    /// Create a new empty in-memory projection store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows of `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .read()
            .unwrap()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// The first row of `table` whose columns equal `key`.
    #[must_use]
    pub fn find(&self, table: &str, key: &[(&str, ColumnValue)]) -> Option<Row> {
        self.state
            .read()
            .unwrap()
            .tables
            .get(table)?
            .iter()
            .find(|row| key.iter().all(|(name, value)| row.get(*name) == Some(value)))
            .cloned()
    }

    /// Number of rows in `table`.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .tables
            .get(table)
            .map_or(0, Vec::len)
    }

    /// Make the next [`ProjectionStore::apply`] fail with a storage error.
    pub fn fail_next_apply(&self, reason: impl Into<String>) {
        self.state.write().unwrap().fail_next_apply = Some(reason.into());
    }

    /// Clear all tables and checkpoints (for test isolation).
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.tables.clear();
        state.positions.clear();
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn apply(
        &self,
        projection_name: &str,
        mutations: Vec<RowMutation>,
        position: EventPosition,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            if let Some(reason) = state.fail_next_apply.take() {
                return Err(ProjectionError::Storage(reason));
            }
            for mutation in mutations {
                apply_mutation(&mut state.tables, mutation);
            }
            state.positions.insert(projection_name, position);
            Ok(())
        })
    }

    fn clear(
        &self,
        projection_name: &str,
        tables: Vec<&'static str>,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            for table in tables {
                state.tables.remove(table);
            }
            state.positions.remove(&projection_name);
            Ok(())
        })
    }
}

impl ProjectionCheckpoint for InMemoryProjectionStore {
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            self.state
                .write()
                .unwrap()
                .positions
                .insert(projection_name, position);
            Ok(())
        })
    }

    fn load_position(&self, projection_name: &str) -> ProjectionFuture<'_, Option<EventPosition>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .unwrap()
                .positions
                .get(&projection_name)
                .copied())
        })
    }
}

/// A failed event as recorded by [`InMemoryFailedEvents`].
#[derive(Clone, Debug, PartialEq)]
pub struct FailedEventRecord {
    /// Projection that failed.
    pub projection_name: String,
    /// The event it could not apply.
    pub event: StoredEvent,
    /// Error message.
    pub error: String,
}

/// In-memory [`FailedEventSink`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryFailedEvents {
    records: Arc<RwLock<Vec<FailedEventRecord>>>,
}

impl InMemoryFailedEvents {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded failure.
    #[must_use]
    pub fn records(&self) -> Vec<FailedEventRecord> {
        self.records.read().unwrap().clone()
    }
}

impl FailedEventSink for InMemoryFailedEvents {
    fn record(
        &self,
        projection_name: &str,
        event: &StoredEvent,
        error: &str,
    ) -> ProjectionFuture<'_, ()> {
        let record = FailedEventRecord {
            projection_name: projection_name.to_string(),
            event: event.clone(),
            error: error.to_string(),
        };
        Box::pin(async move {
            self.records.write().unwrap().push(record);
            Ok(())
        })
    }
}

/// Test harness for projections providing a fluent testing API.
///
/// Runs events through the projection's reducers and applies the resulting
/// mutations to an [`InMemoryProjectionStore`], exactly as the projection
/// manager would.
///
/// # Example
///
/// ```ignore
/// let mut harness = ProjectionTestHarness::new(OrgMemberProjection::new());
///
/// harness.given_events(vec![member_added]).await?;
/// harness.then_row_exists("org_members", &[("user_id", "u1".into())]);
/// ```
pub struct ProjectionTestHarness<P: Projection> {
    projection: P,
    store: Arc<InMemoryProjectionStore>,
}

impl<P: Projection> ProjectionTestHarness<P> {
    /// Create a new test harness with a fresh store.
    #[must_use]
    pub fn new(projection: P) -> Self {
        Self {
            projection,
            store: Arc::new(InMemoryProjectionStore::new()),
        }
    }

    /// Apply a series of events to the projection.
    ///
    /// Events are applied in order. If any event fails to apply,
    /// the error is propagated.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if any event fails to apply.
    pub async fn given_events(&mut self, events: Vec<StoredEvent>) -> Result<&mut Self> {
        for event in events {
            self.given_event(event).await?;
        }
        Ok(self)
    }

    /// Apply a single event to the projection.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the event fails to apply.
    pub async fn given_event(&mut self, event: StoredEvent) -> Result<&mut Self> {
        let mutations = self.projection.reducers().reduce(&event)?;
        self.store
            .apply(self.projection.name(), mutations, EventPosition::of(&event))
            .await?;
        Ok(self)
    }

    /// Assert that `table` has a row matching `key` and return it.
    ///
    /// # Panics
    ///
    /// Panics if no such row exists (this is a test assertion).
    #[allow(clippy::panic)] // Intentional panic for test assertions
    pub fn then_row_exists(&self, table: &str, key: &[(&str, ColumnValue)]) -> Row {
        self.store.find(table, key).unwrap_or_else(|| {
            panic!("Expected table '{table}' to contain a row matching {key:?}, but it was not found")
        })
    }

    /// Assert that `table` has no row matching `key`.
    ///
    /// # Panics
    ///
    /// Panics if a row is found (this is a test assertion).
    pub fn then_row_missing(&self, table: &str, key: &[(&str, ColumnValue)]) -> &Self {
        assert!(
            self.store.find(table, key).is_none(),
            "Expected table '{table}' to NOT contain a row matching {key:?}, but it was found"
        );
        self
    }

    /// Get a reference to the underlying projection store.
    #[must_use]
    pub const fn store(&self) -> &Arc<InMemoryProjectionStore> {
        &self.store
    }

    /// Get a reference to the projection.
    #[must_use]
    pub const fn projection(&self) -> &P {
        &self.projection
    }
}
