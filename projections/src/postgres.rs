//! `PostgreSQL` implementations for projections.
//!
//! # Overview
//!
//! [`PostgresProjectionStore`] turns [`RowMutation`]s into SQL and commits
//! them together with the projection checkpoint:
//!
//! ```text
//! Upsert  →  INSERT INTO t (keys.., values..) VALUES (..)
//!            ON CONFLICT (keys..) DO UPDATE SET v = EXCLUDED.v, ..
//! Update  →  UPDATE t SET v = $n, .. WHERE k = $m AND ..
//! Delete  →  DELETE FROM t WHERE k = $m AND ..
//! ```
//!
//! Tables live next to the event log or in a separate database (true CQRS);
//! the store only needs a pool.
//!
//! # Errors
//!
//! Data errors (SQLSTATE classes 22 and 23: bad values, constraint
//! violations) are reported as [`ProjectionError::EventProcessing`], which
//! makes the manager record and skip the event. Everything else is a
//! [`ProjectionError::Storage`] error and aborts the tick.

use sourced_iam_core::projection::{
    Column, ColumnValue, EventPosition, ProjectionCheckpoint, ProjectionError, ProjectionFuture,
    ProjectionStore, Result, RowMutation,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Transaction};

/// PostgreSQL-backed projection store and checkpoint tracker.
///
/// # Example
///
/// ```ignore
/// let store = PostgresProjectionStore::new(pool);
/// store.migrate().await?;
///
/// let (manager, shutdown) = ProjectionManager::new(
///     OrgMemberProjection::new(),
///     event_store,
///     Arc::new(store),
///     failed_events,
/// );
/// ```
#[derive(Clone, Debug)]
pub struct PostgresProjectionStore {
    pool: PgPool,
}

impl PostgresProjectionStore {
    /// Create a new projection store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a projection store with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if connection fails.
    pub async fn new_with_separate_db(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the projection tables, checkpoints and failed-event table.
    ///
    /// The event log's migrations may share the database, so versions applied
    /// by other migrators are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a sqlx error; data errors are blamed on the event being applied.
pub(crate) fn classify(error: &sqlx::Error) -> ProjectionError {
    if let sqlx::Error::Database(db) = error {
        if let Some(code) = db.code() {
            if code.starts_with("22") || code.starts_with("23") {
                return ProjectionError::EventProcessing(format!("{code}: {}", db.message()));
            }
        }
    }
    ProjectionError::Storage(error.to_string())
}

/// Table and column names are compiled in, but still end up spliced into SQL.
fn identifier(name: &str) -> Result<&str> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(ProjectionError::EventProcessing(format!("invalid identifier: {name:?}")))
    }
}

fn push_value(builder: &mut QueryBuilder<'_, Postgres>, value: &ColumnValue) {
    // Untyped NULL literal: a bound NULL would carry a parameter type that
    // may not match the column.
    match value {
        ColumnValue::Null => builder.push("NULL"),
        ColumnValue::Text(v) => builder.push_bind(v.clone()),
        ColumnValue::Int(v) => builder.push_bind(*v),
        ColumnValue::Bool(v) => builder.push_bind(*v),
        ColumnValue::TextArray(v) => builder.push_bind(v.clone()),
        ColumnValue::Timestamp(v) => builder.push_bind(*v),
    };
}

fn push_conditions(builder: &mut QueryBuilder<'_, Postgres>, key: &[Column]) -> Result<()> {
    builder.push(" WHERE ");
    for (i, column) in key.iter().enumerate() {
        if i > 0 {
            builder.push(" AND ");
        }
        builder.push(identifier(column.name)?);
        if column.value == ColumnValue::Null {
            builder.push(" IS NULL");
        } else {
            builder.push(" = ");
            push_value(builder, &column.value);
        }
    }
    Ok(())
}

/// Render one mutation; `None` if it has nothing to do.
pub(crate) fn mutation_sql(mutation: &RowMutation) -> Result<Option<QueryBuilder<'static, Postgres>>> {
    if mutation.key().is_empty() {
        return Err(ProjectionError::EventProcessing(format!(
            "mutation on {} without key columns",
            mutation.table()
        )));
    }
    let table = identifier(mutation.table())?;

    let builder = match mutation {
        RowMutation::Upsert { key, values, .. } => {
            let mut builder = QueryBuilder::new("INSERT INTO ");
            builder.push(table).push(" (");
            for (i, column) in key.iter().chain(values).enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push(identifier(column.name)?);
            }
            builder.push(") VALUES (");
            for (i, column) in key.iter().chain(values).enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_value(&mut builder, &column.value);
            }
            builder.push(") ON CONFLICT (");
            for (i, column) in key.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push(column.name);
            }
            if values.is_empty() {
                builder.push(") DO NOTHING");
            } else {
                builder.push(") DO UPDATE SET ");
                for (i, column) in values.iter().enumerate() {
                    if i > 0 {
                        builder.push(", ");
                    }
                    builder
                        .push(column.name)
                        .push(" = EXCLUDED.")
                        .push(column.name);
                }
            }
            builder
        }
        RowMutation::Update { key, values, .. } => {
            if values.is_empty() {
                return Ok(None);
            }
            let mut builder = QueryBuilder::new("UPDATE ");
            builder.push(table).push(" SET ");
            for (i, column) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                builder.push(identifier(column.name)?).push(" = ");
                push_value(&mut builder, &column.value);
            }
            push_conditions(&mut builder, key)?;
            builder
        }
        RowMutation::Delete { key, .. } => {
            let mut builder = QueryBuilder::new("DELETE FROM ");
            builder.push(table);
            push_conditions(&mut builder, key)?;
            builder
        }
    };
    Ok(Some(builder))
}

fn to_db(offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| ProjectionError::Checkpoint(format!("{offset} exceeds BIGINT")))
}

async fn save_checkpoint(
    tx: &mut Transaction<'_, Postgres>,
    projection_name: &str,
    position: EventPosition,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO projection_checkpoints (projection_name, event_offset, event_timestamp, updated_at)
         VALUES ($1, $2, $3, now())
         ON CONFLICT (projection_name) DO UPDATE
         SET event_offset = EXCLUDED.event_offset,
             event_timestamp = EXCLUDED.event_timestamp,
             updated_at = now()",
    )
    .bind(projection_name)
    .bind(to_db(position.offset)?)
    .bind(position.timestamp)
    .execute(&mut **tx)
    .await
    .map_err(|e| ProjectionError::Checkpoint(format!("Failed to save checkpoint: {e}")))?;
    Ok(())
}

impl ProjectionStore for PostgresProjectionStore {
    fn apply(
        &self,
        projection_name: &str,
        mutations: Vec<RowMutation>,
        position: EventPosition,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;

            for mutation in &mutations {
                if let Some(mut builder) = mutation_sql(mutation)? {
                    builder
                        .build()
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| classify(&e))?;
                }
            }
            save_checkpoint(&mut tx, &projection_name, position).await?;

            tx.commit()
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))
        })
    }

    fn clear(
        &self,
        projection_name: &str,
        tables: Vec<&'static str>,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))?;

            for table in tables {
                let sql = format!("DELETE FROM {}", identifier(table)?);
                sqlx::query(&sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| ProjectionError::Storage(e.to_string()))?;
            }
            sqlx::query("DELETE FROM projection_checkpoints WHERE projection_name = $1")
                .bind(&projection_name)
                .execute(&mut *tx)
                .await
                .map_err(|e| ProjectionError::Checkpoint(e.to_string()))?;

            tx.commit()
                .await
                .map_err(|e| ProjectionError::Storage(e.to_string()))
        })
    }
}

impl ProjectionCheckpoint for PostgresProjectionStore {
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> ProjectionFuture<'_, ()> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| ProjectionError::Checkpoint(e.to_string()))?;
            save_checkpoint(&mut tx, &projection_name, position).await?;
            tx.commit()
                .await
                .map_err(|e| ProjectionError::Checkpoint(e.to_string()))
        })
    }

    fn load_position(&self, projection_name: &str) -> ProjectionFuture<'_, Option<EventPosition>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            let result: Option<(i64, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
                "SELECT event_offset, event_timestamp
                 FROM projection_checkpoints
                 WHERE projection_name = $1",
            )
            .bind(projection_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Checkpoint(format!("Failed to load checkpoint: {e}")))?;

            result
                .map(|(offset, timestamp)| {
                    u64::try_from(offset)
                        .map(|offset| EventPosition { offset, timestamp })
                        .map_err(|_| ProjectionError::Checkpoint(format!("negative offset {offset}")))
                })
                .transpose()
        })
    }
}
