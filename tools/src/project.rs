//! Runs every read-model projection until shutdown.

use crate::AdminError;
use crate::config::AdminConfig;
use sourced_iam_core::event_store::EventStore;
use sourced_iam_core::projection::{FailedEventSink, Projection, ProjectionStore};
use sourced_iam_projections::{OrgMemberProjection, ProjectionManager, UserProjection};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shared stores handed to each projection manager.
#[derive(Clone)]
pub struct ProjectionStores {
    /// Event log the projections read from.
    pub events: Arc<dyn EventStore>,
    /// Read-model tables and checkpoints.
    pub store: Arc<dyn ProjectionStore>,
    /// Where skipped events are recorded.
    pub failed_events: Arc<dyn FailedEventSink>,
}

fn spawn<P>(
    projection: P,
    stores: &ProjectionStores,
    config: &AdminConfig,
) -> (JoinHandle<Result<(), AdminError>>, watch::Sender<bool>)
where
    P: Projection + 'static,
{
    let (manager, shutdown) = ProjectionManager::new(
        projection,
        stores.events.clone(),
        stores.store.clone(),
        stores.failed_events.clone(),
    );
    let mut manager = manager
        .with_batch_size(config.batch_size)
        .with_poll_interval(config.poll_interval);

    let handle = tokio::spawn(async move { manager.start().await.map_err(AdminError::from) });
    (handle, shutdown)
}

/// Start the user and org member projections, wait for `shutdown`, then stop
/// both and wait for them to finish their current tick.
///
/// # Errors
///
/// Returns the first [`AdminError`] a manager stopped with, or
/// [`AdminError::Task`] if a manager task panicked.
pub async fn run_projections<S>(
    stores: ProjectionStores,
    config: &AdminConfig,
    shutdown: S,
) -> Result<(), AdminError>
where
    S: Future<Output = ()>,
{
    let managers = vec![
        spawn(UserProjection::new(), &stores, config),
        spawn(OrgMemberProjection::new(), &stores, config),
    ];
    tracing::info!(projections = managers.len(), "Projection managers started");

    shutdown.await;
    tracing::info!("Stopping projection managers");

    let (handles, senders): (Vec<_>, Vec<_>) = managers.into_iter().unzip();
    for sender in &senders {
        // A manager that already exited has dropped its receiver.
        let _ = sender.send(true);
    }

    for result in futures::future::join_all(handles).await {
        result.map_err(|e| AdminError::Task(e.to_string()))??;
    }

    tracing::info!("Projection managers stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use sourced_iam_core::aggregate::Aggregate;
    use sourced_iam_core::event::PendingEvent;
    use sourced_iam_projections::org_members::ORG_MEMBERS_TABLE;
    use sourced_iam_projections::users::USERS_TABLE;
    use sourced_iam_testing::{InMemoryEventStore, InMemoryFailedEvents, InMemoryProjectionStore};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_both_projections_until_shutdown() {
        let events = Arc::new(InMemoryEventStore::new());
        let store = Arc::new(InMemoryProjectionStore::new());
        let user = Aggregate::new("INSTANCE", "user", "u1", "org-1");
        let org = Aggregate::new("INSTANCE", "org", "org-1", "org-1");
        events
            .push(
                None,
                vec![PendingEvent::new(
                    user,
                    "user.machine.added",
                    "admin",
                    json!({"userName": "ci-bot", "name": "CI"}),
                )],
            )
            .await
            .unwrap();
        events
            .push(
                None,
                vec![PendingEvent::new(
                    org,
                    "org.member.added",
                    "admin",
                    json!({"userId": "u1", "roles": ["ORG_OWNER"]}),
                )],
            )
            .await
            .unwrap();

        let config = AdminConfig {
            poll_interval: Duration::from_millis(10),
            ..AdminConfig::from_lookup(|_| None).unwrap()
        };
        let stores = ProjectionStores {
            events,
            store: store.clone(),
            failed_events: Arc::new(InMemoryFailedEvents::new()),
        };

        let observed = store.clone();
        let caught_up = async move {
            while observed.count(USERS_TABLE) < 1 || observed.count(ORG_MEMBERS_TABLE) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        tokio::time::timeout(Duration::from_secs(5), run_projections(stores, &config, caught_up))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.count(USERS_TABLE), 1);
        assert_eq!(store.count(ORG_MEMBERS_TABLE), 1);
    }
}
