//! Failed projection events.
//!
//! Persistent record of events a projection could not apply. The manager
//! records the event and advances its checkpoint, so one bad event never
//! stalls a projection; operators inspect the entries, fix the cause and mark
//! them resolved (after a rebuild) or discarded.

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sourced_iam_core::aggregate::{AggregateType, Sequence};
use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::projection::{FailedEventSink, ProjectionError, ProjectionFuture, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Lifecycle of a failed event entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedEventStatus {
    /// Waiting for an operator.
    Pending,
    /// The cause was fixed and the projection rebuilt.
    Resolved,
    /// Deliberately ignored.
    Discarded,
}

impl FailedEventStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] for unknown values.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(ProjectionError::Storage(format!(
                "Invalid failed event status: {s}"
            ))),
        }
    }
}

/// A recorded failure.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// Entry id.
    pub id: i64,
    /// Projection that could not apply the event.
    pub projection_name: String,
    /// The event, as read from the log.
    pub event: StoredEvent,
    /// Last error message.
    pub error_message: String,
    /// How often the event failed (re-recorded after a rebuild).
    pub failure_count: i32,
    /// First failure.
    pub first_failed_at: DateTime<Utc>,
    /// Latest failure.
    pub last_failed_at: DateTime<Utc>,
    /// Entry status.
    pub status: FailedEventStatus,
    /// When the entry was resolved or discarded.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it.
    pub resolved_by: Option<String>,
    /// Resolution notes or discard reason.
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL` store for failed projection events (`failed_projection_events`).
///
/// One entry per projection and log position: recording the same event again
/// (for example after a rebuild) bumps its failure count and reopens it.
#[derive(Clone, Debug)]
pub struct PostgresFailedEvents {
    pool: PgPool,
}

fn storage(e: sqlx::Error) -> ProjectionError {
    ProjectionError::Storage(e.to_string())
}

const SELECT_FAILED: &str = "SELECT id, projection_name, position, instance_id, resource_owner, \
     aggregate_type, aggregate_id, event_type, sequence, created_at, editor, payload, \
     error_message, failure_count, first_failed_at, last_failed_at, status, \
     resolved_at, resolved_by, resolution_notes FROM failed_projection_events";

impl PostgresFailedEvents {
    /// Create a failed-event store. Tables are created by
    /// [`crate::PostgresProjectionStore::migrate`].
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, projection_name: &str, event: &StoredEvent, error: &str) -> Result<i64> {
        let position = i64::try_from(event.position)
            .map_err(|_| ProjectionError::Storage(format!("{} exceeds BIGINT", event.position)))?;
        let sequence = i64::try_from(event.sequence.value())
            .map_err(|_| ProjectionError::Storage(format!("{} exceeds BIGINT", event.sequence)))?;

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_projection_events (
                projection_name, position, instance_id, resource_owner, aggregate_type,
                aggregate_id, event_type, sequence, created_at, editor, payload, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (projection_name, position) DO UPDATE
            SET error_message = EXCLUDED.error_message,
                failure_count = failed_projection_events.failure_count + 1,
                last_failed_at = NOW(),
                status = 'pending',
                resolved_at = NULL,
                resolved_by = NULL,
                resolution_notes = NULL
            RETURNING id
            ",
        )
        .bind(projection_name)
        .bind(position)
        .bind(&event.instance_id)
        .bind(&event.resource_owner)
        .bind(event.aggregate_type.as_str())
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(sequence)
        .bind(event.created_at)
        .bind(&event.editor)
        .bind(sqlx::types::Json(&event.payload))
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        tracing::warn!(
            failed_event_id = id,
            projection = projection_name,
            position = event.position,
            event_type = %event.event_type,
            error = error,
            "Event recorded as failed"
        );

        metrics::counter!("projection.failed_events.recorded", "projection" => projection_name.to_string())
            .increment(1);

        Ok(id)
    }

    /// Pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn list_pending(&self, limit: u32) -> Result<Vec<FailedEvent>> {
        self.list_by_status(FailedEventStatus::Pending, limit).await
    }

    /// Entries with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails or a row is
    /// malformed.
    pub async fn list_by_status(&self, status: FailedEventStatus, limit: u32) -> Result<Vec<FailedEvent>> {
        let sql = format!("{SELECT_FAILED} WHERE status = $1 ORDER BY first_failed_at ASC, id ASC LIMIT $2");
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(i64::from(limit))
            .fetch(&self.pool)
            .map_err(storage)
            .and_then(|row| async move { row_to_failed_event(&row) })
            .try_collect()
            .await
    }

    /// A single entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the entry does not exist or the
    /// query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedEvent> {
        let sql = format!("{SELECT_FAILED} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;

        row_to_failed_event(&row)
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE failed_projection_events
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::info!(failed_event_id = id, resolved_by = resolved_by, "Failed event marked as resolved");
        metrics::counter!("projection.failed_events.resolved").increment(1);

        Ok(())
    }

    /// Mark an entry discarded.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE failed_projection_events
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        tracing::warn!(failed_event_id = id, reason = reason, "Failed event discarded");
        metrics::counter!("projection.failed_events.discarded").increment(1);

        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_projection_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;

        Ok(count)
    }
}

impl FailedEventSink for PostgresFailedEvents {
    fn record(
        &self,
        projection_name: &str,
        event: &StoredEvent,
        error: &str,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        let event = event.clone();
        let error = error.to_string();
        Box::pin(async move {
            self.insert(&projection_name, &event, &error).await?;
            Ok(())
        })
    }
}

fn row_to_failed_event(row: &PgRow) -> Result<FailedEvent> {
    let get_err = |e: sqlx::Error| ProjectionError::Storage(format!("malformed failed event row: {e}"));
    let ordinal = |value: i64| {
        u64::try_from(value).map_err(|_| ProjectionError::Storage(format!("negative ordinal {value}")))
    };

    let status: String = row.try_get("status").map_err(get_err)?;
    let aggregate_type: String = row.try_get("aggregate_type").map_err(get_err)?;
    let payload: sqlx::types::Json<serde_json::Value> = row.try_get("payload").map_err(get_err)?;

    Ok(FailedEvent {
        id: row.try_get("id").map_err(get_err)?,
        projection_name: row.try_get("projection_name").map_err(get_err)?,
        event: StoredEvent {
            instance_id: row.try_get("instance_id").map_err(get_err)?,
            resource_owner: row.try_get("resource_owner").map_err(get_err)?,
            aggregate_type: AggregateType::new(aggregate_type),
            aggregate_id: row.try_get("aggregate_id").map_err(get_err)?,
            event_type: row.try_get("event_type").map_err(get_err)?,
            sequence: Sequence::new(ordinal(row.try_get("sequence").map_err(get_err)?)?),
            position: ordinal(row.try_get("position").map_err(get_err)?)?,
            created_at: row.try_get("created_at").map_err(get_err)?,
            editor: row.try_get("editor").map_err(get_err)?,
            payload: payload.0,
        },
        error_message: row.try_get("error_message").map_err(get_err)?,
        failure_count: row.try_get("failure_count").map_err(get_err)?,
        first_failed_at: row.try_get("first_failed_at").map_err(get_err)?,
        last_failed_at: row.try_get("last_failed_at").map_err(get_err)?,
        status: FailedEventStatus::parse(&status)?,
        resolved_at: row.try_get("resolved_at").map_err(get_err)?,
        resolved_by: row.try_get("resolved_by").map_err(get_err)?,
        resolution_notes: row.try_get("resolution_notes").map_err(get_err)?,
    })
}
