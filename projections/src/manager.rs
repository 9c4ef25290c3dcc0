//! `ProjectionManager` for keeping a projection caught up with the event log.
//!
//! # Overview
//!
//! The `ProjectionManager` coordinates the lifecycle of a projection:
//! - Polls the event log for events after the projection's checkpoint
//! - Dispatches events to the projection's reducers
//! - Applies the resulting row mutations together with the new checkpoint
//! - Records events it cannot apply and moves on
//! - Supports rebuild from scratch
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Event Log  │ filter(position > checkpoint, limit batch_size)
//! └──────┬──────┘
//!        │ events, in position order
//!        ▼
//! ┌─────────────────┐      ┌───────────────────┐
//! │ProjectionManager│─────▶│ FailedEventSink   │ (unappliable events)
//! └────────┬────────┘      └───────────────────┘
//!          │ Vec<RowMutation> + EventPosition
//!          ▼
//! ┌─────────────────┐
//! │ ProjectionStore │ (one transaction per event)
//! └─────────────────┘
//! ```
//!
//! # Delivery
//!
//! Mutations and checkpoint commit together, so each event is applied exactly
//! once per successful tick. If a tick aborts on a storage error, the next one
//! resumes at the last committed checkpoint. Reducers produce keyed upserts,
//! so even a re-applied event converges to the same rows.
//!
//! # Example
//!
//! ```ignore
//! use sourced_iam_projections::*;
//!
//! let (mut manager, shutdown) = ProjectionManager::new(
//!     OrgMemberProjection::new(),
//!     event_store,
//!     projection_store,
//!     failed_events,
//! );
//!
//! // Process events until shutdown (resumes from the last checkpoint)
//! manager.start().await?;
//!
//! // Or rebuild from scratch
//! manager.rebuild().await?;
//! ```

use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::event_store::EventStore;
use sourced_iam_core::projection::{
    EventPosition, FailedEventSink, Projection, ProjectionError, ProjectionStore, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Events fetched per tick.
pub const DEFAULT_BATCH_SIZE: u64 = 200;

/// Pause between ticks once the projection has caught up.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What happened to one event.
enum Outcome {
    Applied,
    Skipped,
}

/// Keeps one projection up to date with the event log.
///
/// `ProjectionManager` is responsible for:
/// - Loading the checkpoint to resume where it left off
/// - Polling the event log system-wide, in global position order
/// - Applying each event's mutations and the checkpoint atomically
/// - Skipping (and recording) events the projection cannot apply
/// - Supporting rebuild functionality
///
/// # Type Parameters
///
/// - `P`: The projection to manage
pub struct ProjectionManager<P>
where
    P: Projection,
{
    projection: Arc<P>,
    event_store: Arc<dyn EventStore>,
    store: Arc<dyn ProjectionStore>,
    failed_events: Arc<dyn FailedEventSink>,
    batch_size: u64,
    poll_interval: Duration,
    /// Shutdown signal
    shutdown: watch::Receiver<bool>,
}

impl<P> ProjectionManager<P>
where
    P: Projection,
{
    /// Create a new projection manager.
    ///
    /// Returns the manager and a shutdown sender. Send `true` to the shutdown
    /// sender to gracefully stop [`ProjectionManager::start`].
    #[must_use]
    pub fn new(
        projection: P,
        event_store: Arc<dyn EventStore>,
        store: Arc<dyn ProjectionStore>,
        failed_events: Arc<dyn FailedEventSink>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = Self {
            projection: Arc::new(projection),
            event_store,
            store,
            failed_events,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown: shutdown_rx,
        };

        (manager, shutdown_tx)
    }

    /// Set how many events are fetched per tick (at least 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the pause between ticks when there is nothing to do.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The managed projection.
    #[must_use]
    pub fn projection(&self) -> &P {
        &self.projection
    }

    /// Process at most one batch of events after the checkpoint.
    ///
    /// Returns how many events were consumed (applied or skipped).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the checkpoint cannot be loaded, the log
    /// cannot be read, or applying/recording an event fails for a reason other
    /// than the event itself. Events before the failing one stay applied.
    pub async fn run_once(&self) -> Result<usize> {
        let projection_name = self.projection.name();
        let offset = self
            .store
            .load_position(projection_name)
            .await?
            .map_or(0, |position| position.offset);

        let events = self
            .event_store
            .filter(self.projection.query(offset, self.batch_size))
            .await
            .map_err(|e| ProjectionError::EventStore(e.to_string()))?;

        let mut applied = 0usize;
        let mut skipped = 0usize;
        for event in &events {
            match self.process_event(event).await? {
                Outcome::Applied => applied += 1,
                Outcome::Skipped => skipped += 1,
            }
        }

        if !events.is_empty() {
            tracing::debug!(
                projection = projection_name,
                from = offset,
                applied,
                skipped,
                "Projection batch processed"
            );
        }

        Ok(events.len())
    }

    /// Run batches until the projection has caught up with the log.
    ///
    /// Returns the total number of events consumed.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`ProjectionManager::run_once`].
    pub async fn catch_up(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let consumed = self.run_once().await?;
            total += consumed;
            if (consumed as u64) < self.batch_size {
                return Ok(total);
            }
        }
    }

    /// Keep the projection up to date until a shutdown signal is received.
    ///
    /// Full batches are followed immediately by the next tick; otherwise the
    /// manager waits for the poll interval. Failed ticks are logged and
    /// retried after the poll interval.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the initial checkpoint cannot be loaded.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (mut manager, shutdown) = ProjectionManager::new(/* ... */);
    ///
    /// // In another task, signal shutdown when needed:
    /// tokio::spawn(async move {
    ///     tokio::signal::ctrl_c().await.ok();
    ///     shutdown.send(true).ok();
    /// });
    ///
    /// manager.start().await?;
    /// ```
    #[allow(clippy::cognitive_complexity)]
    pub async fn start(&mut self) -> Result<()> {
        let projection_name = self.projection.name().to_string();
        tracing::info!(
            projection = %projection_name,
            batch_size = self.batch_size,
            poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Starting projection manager"
        );

        match self.store.load_position(&projection_name).await? {
            Some(position) => tracing::info!(
                projection = %projection_name,
                offset = position.offset,
                timestamp = %position.timestamp,
                "Resuming from checkpoint"
            ),
            None => tracing::info!(projection = %projection_name, "Starting from beginning"),
        }

        while !*self.shutdown.borrow() {
            let wait = match self.run_once().await {
                Ok(consumed) => (consumed as u64) < self.batch_size,
                Err(e) => {
                    tracing::error!(
                        projection = %projection_name,
                        error = %e,
                        "Projection tick failed"
                    );
                    metrics::counter!("projection.ticks.failed", "projection" => projection_name.clone())
                        .increment(1);
                    true
                }
            };

            if wait {
                tokio::select! {
                    () = tokio::time::sleep(self.poll_interval) => {}
                    changed = self.shutdown.changed() => {
                        if changed.is_err() || *self.shutdown.borrow() {
                            tracing::info!(projection = %projection_name, "Shutdown signal received");
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(projection = %projection_name, "Projection manager stopped");
        Ok(())
    }

    /// Rebuild the projection from scratch.
    ///
    /// Clears the projection's tables and its checkpoint in one step; the next
    /// tick replays the log from the beginning.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the tables or checkpoint cannot be
    /// cleared.
    pub async fn rebuild(&self) -> Result<()> {
        let projection_name = self.projection.name();
        tracing::info!(projection = projection_name, "Rebuilding projection");

        self.store
            .clear(projection_name, self.projection.tables().to_vec())
            .await?;

        tracing::info!(
            projection = projection_name,
            "Projection cleared - next tick replays from the beginning"
        );
        Ok(())
    }

    /// Apply a single event, or record it and advance past it.
    async fn process_event(&self, event: &StoredEvent) -> Result<Outcome> {
        let projection_name = self.projection.name();
        let position = EventPosition::of(event);

        let applied = match self.projection.reducers().reduce(event) {
            Ok(mutations) => self.store.apply(projection_name, mutations, position).await,
            Err(e) => Err(e),
        };

        match applied {
            Ok(()) => {
                metrics::counter!("projection.events.applied", "projection" => projection_name.to_string())
                    .increment(1);
                Ok(Outcome::Applied)
            }
            Err(ProjectionError::EventProcessing(reason)) => {
                tracing::error!(
                    projection = projection_name,
                    position = event.position,
                    event_type = %event.event_type,
                    aggregate_id = %event.aggregate_id,
                    error = %reason,
                    "Failed to apply event, skipping"
                );
                metrics::counter!("projection.events.failed", "projection" => projection_name.to_string())
                    .increment(1);

                self.failed_events
                    .record(projection_name, event, &reason)
                    .await?;
                self.store.save_position(projection_name, position).await?;
                Ok(Outcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}
