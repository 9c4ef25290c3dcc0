//! Projection materializer and read models for Sourced IAM.
//!
//! # Overview
//!
//! This crate provides the query side of the engine:
//! - **`ProjectionManager`**: polls the event log and keeps a projection caught up
//! - **`PostgreSQL`**: projection store applying row mutations and checkpoints
//!   in one transaction, plus the failed-event table
//! - **Read models**: `OrgMemberProjection` and `UserProjection`
//! - **Queries**: `OrgMembersQuery`, joining memberships with user details
//!
//! # CQRS Separation
//!
//! Projection tables may live in the event store's database or in a separate
//! one:
//!
//! ```text
//! Event Store DB (Write)  →  ProjectionManager (poll)  →  Projection DB (Read)
//! ```
//!
//! # Running a projection
//!
//! ```ignore
//! use sourced_iam_projections::*;
//!
//! let store = Arc::new(PostgresProjectionStore::new(pool.clone()));
//! let failed = Arc::new(PostgresFailedEvents::new(pool));
//!
//! let (mut manager, shutdown) =
//!     ProjectionManager::new(OrgMemberProjection::new(), event_store, store, failed);
//! manager.start().await?;
//! ```

pub mod failed_events;
pub mod manager;
pub mod org_members;
pub mod postgres;
pub mod query;
pub mod users;

use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::projection::{Column, ProjectionError, Result};

// Re-export main types for convenience
pub use failed_events::{FailedEvent, FailedEventStatus, PostgresFailedEvents};
pub use manager::ProjectionManager;
pub use org_members::OrgMemberProjection;
pub use postgres::PostgresProjectionStore;
pub use query::{Member, Members, OrgMembersQuery};
pub use users::UserProjection;

/// An organization was removed.
pub const ORG_REMOVED: &str = "org.removed";

/// A user was removed.
pub const USER_REMOVED: &str = "user.removed";

/// The event's aggregate sequence as a `sequence` column.
///
/// # Errors
///
/// Returns [`ProjectionError::EventProcessing`] if the sequence does not fit
/// the `BIGINT` column.
pub(crate) fn sequence_column(event: &StoredEvent) -> Result<Column> {
    let sequence = i64::try_from(event.sequence.value()).map_err(|_| {
        ProjectionError::EventProcessing(format!(
            "sequence {} of {} is out of range",
            event.sequence,
            event.key()
        ))
    })?;
    Ok(Column::new("sequence", sequence))
}
