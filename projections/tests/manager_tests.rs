//! `ProjectionManager` against the in-memory event log and projection store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use serde_json::json;
use sourced_iam_command::{CommandContext, Commands, SecretCrypto};
use sourced_iam_core::aggregate::Aggregate;
use sourced_iam_core::event::PendingEvent;
use sourced_iam_core::event_store::{EventStore, EventStoreError};
use sourced_iam_core::projection::{ColumnValue, ProjectionCheckpoint, ProjectionError};
use sourced_iam_projections::org_members::ORG_MEMBERS_TABLE;
use sourced_iam_projections::users::{LOGIN_NAMES_TABLE, USERS_TABLE};
use sourced_iam_projections::{OrgMemberProjection, ProjectionManager, UserProjection};
use sourced_iam_testing::{InMemoryEventStore, InMemoryFailedEvents, InMemoryProjectionStore};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    events: Arc<InMemoryEventStore>,
    store: Arc<InMemoryProjectionStore>,
    failed: Arc<InMemoryFailedEvents>,
    commands: Commands,
}

fn fixture() -> Fixture {
    sourced_iam_testing::init_test_tracing();
    let events = Arc::new(InMemoryEventStore::new());
    let crypto = SecretCrypto::new("key-1", &[3u8; 32]).expect("valid key");
    Fixture {
        commands: Commands::new(events.clone(), crypto),
        events,
        store: Arc::new(InMemoryProjectionStore::new()),
        failed: Arc::new(InMemoryFailedEvents::new()),
    }
}

impl Fixture {
    fn members(&self) -> ProjectionManager<OrgMemberProjection> {
        let (manager, _shutdown) = ProjectionManager::new(
            OrgMemberProjection::new(),
            self.events.clone(),
            self.store.clone(),
            self.failed.clone(),
        );
        manager
    }

    async fn add_member(&self, org: &str, user: &str) {
        self.commands
            .add_org_member(&ctx(), org, user, vec!["ORG_OWNER".to_string()])
            .await
            .unwrap();
    }

    async fn push_raw(&self, aggregate_type: &str, id: &str, event_type: &str, payload: serde_json::Value) {
        let aggregate = Aggregate::new("INSTANCE", aggregate_type, id, "org-1");
        self.events
            .push(None, vec![PendingEvent::new(aggregate, event_type, "admin", payload)])
            .await
            .unwrap();
    }

    async fn checkpoint(&self, projection: &str) -> Option<u64> {
        self.store
            .load_position(projection)
            .await
            .unwrap()
            .map(|position| position.offset)
    }
}

fn ctx() -> CommandContext {
    CommandContext::new("INSTANCE", "admin")
}

fn text(value: &str) -> ColumnValue {
    ColumnValue::Text(value.to_string())
}

#[tokio::test]
async fn catch_up_materializes_committed_commands() {
    let fx = fixture();
    fx.add_member("org-1", "u1").await;
    fx.add_member("org-1", "u2").await;
    fx.commands
        .change_org_member(&ctx(), "org-1", "u1", vec!["ORG_OWNER".to_string(), "ORG_USER_MANAGER".to_string()])
        .await
        .unwrap();
    fx.commands.remove_org_member(&ctx(), "org-1", "u2").await.unwrap();

    let consumed = fx.members().catch_up().await.unwrap();

    assert_eq!(consumed, 4);
    assert_eq!(fx.store.count(ORG_MEMBERS_TABLE), 1);
    let row = fx
        .store
        .find(ORG_MEMBERS_TABLE, &[("user_id", text("u1"))])
        .unwrap();
    assert_eq!(
        row["roles"],
        ColumnValue::TextArray(vec!["ORG_OWNER".to_string(), "ORG_USER_MANAGER".to_string()])
    );
    assert_eq!(fx.checkpoint(OrgMemberProjection::NAME).await, Some(4));
}

#[tokio::test]
async fn resumes_after_checkpoint() {
    let fx = fixture();
    let manager = fx.members();
    fx.add_member("org-1", "u1").await;
    assert_eq!(manager.run_once().await.unwrap(), 1);

    fx.add_member("org-1", "u2").await;
    assert_eq!(manager.run_once().await.unwrap(), 1);
    assert_eq!(manager.run_once().await.unwrap(), 0);
    assert_eq!(fx.store.count(ORG_MEMBERS_TABLE), 2);
}

#[tokio::test]
async fn batches_are_bounded() {
    let fx = fixture();
    for user in ["u1", "u2", "u3", "u4", "u5"] {
        fx.add_member("org-1", user).await;
    }
    let manager = fx.members().with_batch_size(2);

    assert_eq!(manager.run_once().await.unwrap(), 2);
    assert_eq!(manager.catch_up().await.unwrap(), 3);
    assert_eq!(fx.store.count(ORG_MEMBERS_TABLE), 5);
}

#[tokio::test]
async fn unrelated_events_are_not_read() {
    let fx = fixture();
    fx.push_raw("org", "org-1", "org.added", json!({"name": "ACME"})).await;
    fx.push_raw("project", "p1", "project.added", json!({})).await;
    fx.add_member("org-1", "u1").await;

    assert_eq!(fx.members().catch_up().await.unwrap(), 1);
    assert_eq!(fx.checkpoint(OrgMemberProjection::NAME).await, Some(3));
}

#[tokio::test]
async fn undecodable_event_is_recorded_and_skipped() {
    let fx = fixture();
    fx.push_raw("org", "org-1", "org.member.added", json!({"userId": 7})).await;
    fx.add_member("org-1", "u2").await;

    let consumed = fx.members().catch_up().await.unwrap();

    assert_eq!(consumed, 2);
    assert_eq!(fx.store.count(ORG_MEMBERS_TABLE), 1);
    let records = fx.failed.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].projection_name, OrgMemberProjection::NAME);
    assert_eq!(records[0].event.position, 1);
    assert_eq!(fx.checkpoint(OrgMemberProjection::NAME).await, Some(2));
}

#[tokio::test]
async fn storage_failure_aborts_the_tick_without_losing_events() {
    let fx = fixture();
    fx.add_member("org-1", "u1").await;
    fx.add_member("org-1", "u2").await;
    let manager = fx.members();

    fx.store.fail_next_apply("connection reset");
    let err = manager.run_once().await.unwrap_err();
    assert!(matches!(err, ProjectionError::Storage(_)));
    assert_eq!(fx.checkpoint(OrgMemberProjection::NAME).await, None);
    assert!(fx.failed.records().is_empty());

    assert_eq!(manager.catch_up().await.unwrap(), 2);
    assert_eq!(fx.store.count(ORG_MEMBERS_TABLE), 2);
}

#[tokio::test]
async fn event_log_failure_is_reported() {
    let fx = fixture();
    fx.add_member("org-1", "u1").await;
    fx.events
        .fail_next(EventStoreError::DatabaseError("log unavailable".to_string()));

    let err = fx.members().run_once().await.unwrap_err();
    assert!(matches!(err, ProjectionError::EventStore(_)));
}

#[tokio::test]
async fn rebuild_replays_to_the_same_rows() {
    let fx = fixture();
    fx.add_member("org-1", "u1").await;
    fx.add_member("org-2", "u1").await;
    let manager = fx.members();
    manager.catch_up().await.unwrap();
    let before = fx.store.rows(ORG_MEMBERS_TABLE);

    manager.rebuild().await.unwrap();
    assert_eq!(fx.store.count(ORG_MEMBERS_TABLE), 0);
    assert_eq!(fx.checkpoint(OrgMemberProjection::NAME).await, None);

    assert_eq!(manager.catch_up().await.unwrap(), 2);
    assert_eq!(fx.store.rows(ORG_MEMBERS_TABLE), before);
}

#[tokio::test]
async fn projections_keep_independent_checkpoints() {
    let fx = fixture();
    fx.push_raw(
        "user",
        "u1",
        "user.human.added",
        json!({"userName": "ada", "firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.com"}),
    )
    .await;
    fx.add_member("org-1", "u1").await;

    let (users, _shutdown) = ProjectionManager::new(
        UserProjection::new(),
        fx.events.clone(),
        fx.store.clone(),
        fx.failed.clone(),
    );
    assert_eq!(users.catch_up().await.unwrap(), 1);
    assert_eq!(fx.members().catch_up().await.unwrap(), 1);

    assert_eq!(fx.checkpoint(UserProjection::NAME).await, Some(1));
    assert_eq!(fx.checkpoint(OrgMemberProjection::NAME).await, Some(2));
    assert_eq!(fx.store.count(USERS_TABLE), 1);
    assert_eq!(fx.store.count(LOGIN_NAMES_TABLE), 1);
}

#[tokio::test]
async fn start_follows_the_log_until_shutdown() {
    let fx = fixture();
    let (manager, shutdown) = ProjectionManager::new(
        OrgMemberProjection::new(),
        fx.events.clone(),
        fx.store.clone(),
        fx.failed.clone(),
    );
    let mut manager = manager.with_poll_interval(Duration::from_millis(10));
    let handle = tokio::spawn(async move { manager.start().await });

    fx.add_member("org-1", "u1").await;
    fx.add_member("org-1", "u2").await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while fx.store.count(ORG_MEMBERS_TABLE) < 2 {
        assert!(tokio::time::Instant::now() < deadline, "projection did not catch up");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("manager should stop")
        .expect("task should not panic")
        .unwrap();
}
