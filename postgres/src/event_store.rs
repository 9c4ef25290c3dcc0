//! `PostgreSQL` implementation of [`EventStore`].
//!
//! # Schema
//!
//! See `migrations/`: one `events` table keyed by
//! `(instance_id, aggregate_type, aggregate_id, sequence)` with a global
//! `position` sequence and a JSONB payload (GIN indexed for `@>` lookups).
//!
//! # Write path
//!
//! A push runs in one transaction:
//!
//! 1. take a transaction-scoped advisory lock on the aggregate key, so writers
//!    of the same aggregate queue up instead of racing,
//! 2. read the aggregate's head sequence and compare it to the expectation,
//! 3. take the commit-order lock, so positions become visible in order and a
//!    projection polling `position > checkpoint` never skips an event,
//! 4. insert the batch and commit.
//!
//! The primary key remains the last line of defence: a unique violation is
//! reported as a [`EventStoreError::ConcurrencyConflict`].

use chrono::{DateTime, Utc};
use sourced_iam_core::aggregate::{AggregateKey, AggregateType, Sequence};
use sourced_iam_core::event::{PendingEvent, StoredEvent};
use sourced_iam_core::event_store::{EventStore, EventStoreError, StoreFuture, validate_batch};
use sourced_iam_core::search::{InstanceScope, OrderBy, SearchQuery, SearchQueryBuilder, SortOrder};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Instant;

use crate::config::PostgresConfig;

/// Advisory lock (two-key form) serialising the insert phase of every push.
const COMMIT_ORDER_LOCK: (i32, i32) = (0x5EED, 1);

const SELECT_EVENTS: &str = "SELECT instance_id, resource_owner, aggregate_type, aggregate_id, \
     event_type, sequence, position, created_at, editor, payload FROM events";

/// PostgreSQL-backed event store.
///
/// # Example
///
/// ```no_run
/// use sourced_iam_postgres::PostgresEventStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresEventStore::new("postgres://localhost/iam").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

fn database_error(e: sqlx::Error) -> EventStoreError {
    EventStoreError::DatabaseError(e.to_string())
}

fn to_db(value: u64) -> Result<i64, EventStoreError> {
    i64::try_from(value)
        .map_err(|_| EventStoreError::SerializationError(format!("{value} exceeds BIGINT")))
}

fn from_db(value: i64) -> Result<u64, EventStoreError> {
    u64::try_from(value)
        .map_err(|_| EventStoreError::SerializationError(format!("negative ordinal {value}")))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

impl PostgresEventStore {
    /// Connect to `database_url` with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, EventStoreError> {
        let config = PostgresConfig {
            url: database_url.to_string(),
            ..PostgresConfig::default()
        };
        Self::from_config(&config).await
    }

    /// Connect using a [`PostgresConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if the connection fails.
    pub async fn from_config(config: &PostgresConfig) -> Result<Self, EventStoreError> {
        let pool = config
            .connect()
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `events` table and its indexes.
    ///
    /// Projection migrations may share the database, so versions applied by
    /// other migrators are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::DatabaseError`] if migration fails.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(format!("Migration failed: {e}")))
    }

    async fn push_batch(
        &self,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = validate_batch(&events)?;
        let started = Instant::now();
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.to_string())
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        let (head,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) FROM events
             WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3",
        )
        .bind(&key.instance_id)
        .bind(key.aggregate_type.as_str())
        .bind(&key.aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(database_error)?;
        let current = Sequence::new(from_db(head)?);

        if let Some(expected) = expected {
            if expected != current {
                return Err(conflict(key, expected, current));
            }
        }

        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(COMMIT_ORDER_LOCK.0)
            .bind(COMMIT_ORDER_LOCK.1)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO events (instance_id, aggregate_type, aggregate_id, sequence, \
             resource_owner, event_type, editor, payload) ",
        );
        let mut rows = Vec::with_capacity(events.len());
        let mut sequence = current;
        for event in events {
            sequence = sequence.next();
            rows.push((to_db(sequence.value())?, event));
        }
        insert.push_values(&rows, |mut row, (sequence, event)| {
            row.push_bind(&event.aggregate.instance_id)
                .push_bind(event.aggregate.aggregate_type.as_str())
                .push_bind(&event.aggregate.aggregate_id)
                .push_bind(*sequence)
                .push_bind(&event.aggregate.resource_owner)
                .push_bind(&event.event_type)
                .push_bind(&event.editor)
                .push_bind(Json(&event.payload));
        });
        insert.push(" RETURNING instance_id, resource_owner, aggregate_type, aggregate_id, event_type, sequence, position, created_at, editor, payload");

        let inserted = match insert.build().fetch_all(&mut *tx).await {
            Ok(inserted) => inserted,
            Err(e) if is_unique_violation(&e) => {
                return Err(conflict(key, expected.unwrap_or(current), current));
            }
            Err(e) => return Err(database_error(e)),
        };
        tx.commit().await.map_err(database_error)?;

        let mut stored = inserted
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        stored.sort_by_key(|event| event.sequence);

        metrics::counter!(
            "event_store.events.pushed",
            "aggregate_type" => key.aggregate_type.to_string()
        )
        .increment(stored.len() as u64);
        metrics::histogram!("event_store.push.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            aggregate = %key,
            events = stored.len(),
            sequence = %sequence,
            "Events pushed"
        );

        Ok(stored)
    }

    async fn filter_events(
        &self,
        query: SearchQueryBuilder,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut sql = build_filter(&query)?;
        let rows = sql
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn head(&self, key: AggregateKey) -> Result<Sequence, EventStoreError> {
        let (head,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) FROM events
             WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3",
        )
        .bind(&key.instance_id)
        .bind(key.aggregate_type.as_str())
        .bind(&key.aggregate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(Sequence::new(from_db(head)?))
    }
}

fn conflict(aggregate: AggregateKey, expected: Sequence, actual: Sequence) -> EventStoreError {
    metrics::counter!(
        "event_store.conflicts",
        "aggregate_type" => aggregate.aggregate_type.to_string()
    )
    .increment(1);
    tracing::debug!(
        aggregate = %aggregate,
        expected = %expected,
        actual = %actual,
        "Concurrency conflict"
    );
    EventStoreError::ConcurrencyConflict {
        aggregate,
        expected,
        actual,
    }
}

fn push_sub_query(sql: &mut QueryBuilder<'_, Postgres>, query: &SearchQuery) -> Result<(), EventStoreError> {
    sql.push("(TRUE");
    if !query.aggregate_type_filter().is_empty() {
        let types: Vec<String> = query
            .aggregate_type_filter()
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        sql.push(" AND aggregate_type = ANY(").push_bind(types).push(")");
    }
    if !query.aggregate_id_filter().is_empty() {
        sql.push(" AND aggregate_id = ANY(")
            .push_bind(query.aggregate_id_filter().to_vec())
            .push(")");
    }
    if !query.event_type_filter().is_empty() {
        sql.push(" AND event_type = ANY(")
            .push_bind(query.event_type_filter().to_vec())
            .push(")");
    }
    if let Some(sequence) = query.sequence_greater_filter() {
        sql.push(" AND sequence > ").push_bind(to_db(sequence.value())?);
    }
    if let Some(sequence) = query.sequence_at_most_filter() {
        sql.push(" AND sequence <= ").push_bind(to_db(sequence.value())?);
    }
    if !query.event_data_filter().is_empty() {
        sql.push(" AND payload @> ")
            .push_bind(Json(serde_json::Value::Object(query.event_data_filter().clone())));
    }
    sql.push(")");
    Ok(())
}

/// Translate a search into SQL.
///
/// # Errors
///
/// Returns [`EventStoreError::SerializationError`] if a bound exceeds `BIGINT`.
pub fn build_filter(query: &SearchQueryBuilder) -> Result<QueryBuilder<'static, Postgres>, EventStoreError> {
    let mut sql = QueryBuilder::<Postgres>::new(SELECT_EVENTS);
    sql.push(" WHERE TRUE");

    if let InstanceScope::Instance(instance_id) = query.scope() {
        sql.push(" AND instance_id = ").push_bind(instance_id.clone());
    }
    if let Some(owner) = query.resource_owner_filter() {
        sql.push(" AND resource_owner = ").push_bind(owner.to_string());
    }
    if let Some(position) = query.position_after_filter() {
        sql.push(" AND position > ").push_bind(to_db(position)?);
    }
    if !query.queries().is_empty() {
        sql.push(" AND (");
        for (index, sub_query) in query.queries().iter().enumerate() {
            if index > 0 {
                sql.push(" OR ");
            }
            push_sub_query(&mut sql, sub_query)?;
        }
        sql.push(")");
    }

    let direction = match query.sort_order() {
        SortOrder::Ascending => "ASC",
        SortOrder::Descending => "DESC",
    };
    match query.ordering() {
        OrderBy::AggregateSequence => {
            sql.push(format!(
                " ORDER BY aggregate_id {direction}, sequence {direction}, position {direction}"
            ));
        }
        OrderBy::Position => {
            sql.push(format!(" ORDER BY position {direction}"));
        }
    }

    if let Some(limit) = query.limit_value() {
        sql.push(" LIMIT ").push_bind(to_db(limit)?);
    }
    if query.offset_value() > 0 {
        sql.push(" OFFSET ").push_bind(to_db(query.offset_value())?);
    }
    Ok(sql)
}

fn decode_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let field = |e: sqlx::Error| EventStoreError::SerializationError(e.to_string());

    let aggregate_type: String = row.try_get("aggregate_type").map_err(field)?;
    let sequence: i64 = row.try_get("sequence").map_err(field)?;
    let position: i64 = row.try_get("position").map_err(field)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(field)?;
    let Json(payload): Json<serde_json::Value> = row.try_get("payload").map_err(field)?;

    Ok(StoredEvent {
        instance_id: row.try_get("instance_id").map_err(field)?,
        resource_owner: row.try_get("resource_owner").map_err(field)?,
        aggregate_type: AggregateType::new(aggregate_type),
        aggregate_id: row.try_get("aggregate_id").map_err(field)?,
        event_type: row.try_get("event_type").map_err(field)?,
        sequence: Sequence::new(from_db(sequence)?),
        position: from_db(position)?,
        created_at,
        editor: row.try_get("editor").map_err(field)?,
        payload,
    })
}

impl EventStore for PostgresEventStore {
    fn push(
        &self,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(self.push_batch(expected, events))
    }

    fn filter(&self, query: SearchQueryBuilder) -> StoreFuture<'_, Vec<StoredEvent>> {
        Box::pin(self.filter_events(query))
    }

    fn latest_sequence(&self, aggregate: AggregateKey) -> StoreFuture<'_, Sequence> {
        Box::pin(self.head(aggregate))
    }
}
