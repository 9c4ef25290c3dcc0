//! The command pipeline shared by every domain command.

use crate::context::CommandContext;
use crate::crypto::SecretCrypto;
use crate::error::CommandError;
use chrono::{DateTime, Utc};
use sourced_iam_core::aggregate::Sequence;
use sourced_iam_core::environment::IdGenerator;
use sourced_iam_core::event::{PendingEvent, StoredEvent};
use sourced_iam_core::event_store::{EventStore, EventStoreError};
use sourced_iam_core::write_model::WriteModel;
use std::future::Future;
use std::sync::Arc;

/// Identity metadata returned by every successful command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDetails {
    /// Tenant of the aggregate.
    pub instance_id: String,
    /// Aggregate the command wrote to.
    pub aggregate_id: String,
    /// Resource owner of the aggregate.
    pub resource_owner: String,
    /// Sequence of the last event pushed.
    pub sequence: Sequence,
    /// Creation date of the last event pushed.
    pub change_date: DateTime<Utc>,
}

impl ObjectDetails {
    /// Details of the last event of a committed batch.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Storage`] if the batch is empty.
    pub fn from_pushed(events: &[StoredEvent]) -> Result<Self, CommandError> {
        let last = events.last().ok_or_else(|| {
            CommandError::Storage(EventStoreError::InvalidBatch("push returned no events".to_string()))
        })?;
        Ok(Self {
            instance_id: last.instance_id.clone(),
            aggregate_id: last.aggregate_id.clone(),
            resource_owner: last.resource_owner.clone(),
            sequence: last.sequence,
            change_date: last.created_at,
        })
    }
}

/// Random v4 UUIDs, without dashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

/// Entry point for all commands.
///
/// Holds only shared, immutable collaborators; each call builds its own
/// write model, so one `Commands` serves any number of concurrent requests.
#[derive(Clone)]
pub struct Commands {
    event_store: Arc<dyn EventStore>,
    crypto: SecretCrypto,
    ids: Arc<dyn IdGenerator>,
}

impl Commands {
    /// Create the command side over `event_store`, encrypting secrets with `crypto`.
    #[must_use]
    pub fn new(event_store: Arc<dyn EventStore>, crypto: SecretCrypto) -> Self {
        Self {
            event_store,
            crypto,
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Replace the id generator used for new objects.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub(crate) const fn crypto(&self) -> &SecretCrypto {
        &self.crypto
    }

    pub(crate) fn next_id(&self) -> String {
        self.ids.next_id()
    }

    /// Bring `model` up to date with the log.
    ///
    /// Reads the aggregate head first, then the model's events up to that
    /// head, so a concurrent append after the read is caught by the push.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Storage`] if the store fails or the deadline
    /// passes, and [`CommandError::Corruption`] if an event cannot be decoded.
    pub async fn load<M: WriteModel>(&self, ctx: &CommandContext, model: &mut M) -> Result<(), CommandError> {
        let head = bounded(ctx, self.event_store.latest_sequence(model.key())).await?;
        let events = bounded(ctx, self.event_store.filter(model.query())).await?;

        model.append_events(events.into_iter().filter(|e| e.sequence <= head).collect());
        model.reduce()?;
        model.base_mut().aggregate_sequence = head;

        tracing::debug!(
            aggregate = %model.key(),
            processed_sequence = %model.base().processed_sequence,
            head = %head,
            "Write model loaded"
        );
        Ok(())
    }

    /// Push `events` expecting the aggregate to still be at `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Concurrency`] if another writer got there
    /// first and [`CommandError::Storage`] for any other store failure.
    pub async fn push(
        &self,
        ctx: &CommandContext,
        expected: Sequence,
        events: Vec<PendingEvent>,
    ) -> Result<Vec<StoredEvent>, CommandError> {
        let count = events.len();
        let stored = bounded(ctx, self.event_store.push(Some(expected), events)).await?;

        if let Some(last) = stored.last() {
            tracing::info!(
                instance_id = %last.instance_id,
                aggregate = %last.key(),
                sequence = %last.sequence,
                events = count,
                "Events pushed"
            );
        }
        Ok(stored)
    }
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("crypto", &self.crypto)
            .finish_non_exhaustive()
    }
}

/// Await a storage call, failing with `DeadlineExceeded` once the context's
/// deadline has passed. Dropping the call cancels it.
async fn bounded<T, F>(ctx: &CommandContext, call: F) -> Result<T, EventStoreError>
where
    F: Future<Output = Result<T, EventStoreError>>,
{
    match ctx.deadline() {
        // `timeout_at` polls the call before the timer; an expired deadline
        // must not reach the store at all.
        Some(deadline) if tokio::time::Instant::now() >= deadline => Err(EventStoreError::DeadlineExceeded),
        Some(deadline) => tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| EventStoreError::DeadlineExceeded)?,
        None => call.await,
    }
}
