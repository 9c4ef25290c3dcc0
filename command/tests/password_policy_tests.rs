//! Password complexity policy commands against the in-memory event store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use serde_json::json;
use sourced_iam_command::password_policy::{
    InstancePasswordComplexityPolicyAdded, OrgPasswordComplexityPolicyAdded,
};
use sourced_iam_command::{
    CommandContext, CommandError, Commands, ErrorKind, PasswordComplexityPolicy, SecretCrypto,
};
use sourced_iam_core::aggregate::{Aggregate, Sequence};
use sourced_iam_core::event::PendingEvent;
use sourced_iam_core::event_store::{EventStore, EventStoreError};
use sourced_iam_testing::InMemoryEventStore;
use std::sync::Arc;

fn setup() -> (Arc<InMemoryEventStore>, Commands) {
    sourced_iam_testing::init_test_tracing();
    let store = Arc::new(InMemoryEventStore::new());
    let crypto = SecretCrypto::new("key-1", &[1u8; 32]).expect("valid key");
    let commands = Commands::new(store.clone(), crypto);
    (store, commands)
}

fn ctx() -> CommandContext {
    CommandContext::new("INSTANCE", "admin")
}

fn strict() -> PasswordComplexityPolicy {
    PasswordComplexityPolicy {
        min_length: 8,
        has_uppercase: true,
        has_lowercase: true,
        has_number: true,
        has_symbol: true,
    }
}

async fn given_default_policy(store: &InMemoryEventStore, policy: PasswordComplexityPolicy) {
    let instance = Aggregate::new("INSTANCE", "instance", "INSTANCE", "INSTANCE");
    let event = PendingEvent::from_event(&instance, "setup", &InstancePasswordComplexityPolicyAdded(policy)).unwrap();
    store.push(Some(Sequence::INITIAL), vec![event]).await.unwrap();
}

#[tokio::test]
async fn add_with_zero_min_length_is_invalid_and_touches_nothing() {
    let (store, commands) = setup();
    let policy = PasswordComplexityPolicy {
        min_length: 0,
        ..strict()
    };

    let err = commands
        .add_default_password_complexity_policy(&ctx(), policy)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(store.is_empty());
}

#[tokio::test]
async fn add_when_policy_exists_is_already_exists() {
    let (store, commands) = setup();
    given_default_policy(&store, strict()).await;

    let err = commands
        .add_default_password_complexity_policy(&ctx(), strict())
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::AlreadyExists(_)));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn add_pushes_single_event_and_returns_identity() {
    let (store, commands) = setup();

    let result = commands
        .add_default_password_complexity_policy(&ctx(), strict())
        .await
        .unwrap();

    assert_eq!(result.policy, strict());
    assert_eq!(result.details.instance_id, "INSTANCE");
    assert_eq!(result.details.aggregate_id, "INSTANCE");
    assert_eq!(result.details.resource_owner, "INSTANCE");
    assert_eq!(result.details.sequence, Sequence::new(1));

    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "policy.password.added");
    assert_eq!(events[0].editor, "admin");
    assert_eq!(
        events[0].payload,
        json!({
            "minLength": 8,
            "upper": true,
            "lower": true,
            "number": true,
            "symbol": true,
        })
    );
}

#[tokio::test]
async fn change_without_policy_is_not_found() {
    let (store, commands) = setup();

    let err = commands
        .change_default_password_complexity_policy(&ctx(), strict())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(store.is_empty());
}

#[tokio::test]
async fn change_to_identical_values_is_precondition_failed() {
    let (store, commands) = setup();
    given_default_policy(&store, strict()).await;

    let err = commands
        .change_default_password_complexity_policy(&ctx(), strict())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn change_pushes_only_changed_fields() {
    let (store, commands) = setup();
    given_default_policy(&store, strict()).await;
    let relaxed = PasswordComplexityPolicy::new(10);

    let result = commands
        .change_default_password_complexity_policy(&ctx(), relaxed.clone())
        .await
        .unwrap();

    assert_eq!(result.policy, relaxed);
    assert_eq!(result.details.sequence, Sequence::new(2));

    let events = store.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type, "policy.password.changed");
    assert_eq!(
        events[1].payload,
        json!({
            "minLength": 10,
            "upper": false,
            "lower": false,
            "number": false,
            "symbol": false,
        })
    );

    let partial = PasswordComplexityPolicy {
        has_symbol: true,
        ..relaxed
    };
    commands
        .change_default_password_complexity_policy(&ctx(), partial)
        .await
        .unwrap();
    assert_eq!(store.events()[2].payload, json!({"symbol": true}));
}

#[tokio::test]
async fn org_policy_lifecycle() {
    let (store, commands) = setup();
    let ctx = ctx();

    commands
        .add_org_password_complexity_policy(&ctx, "org-1", strict())
        .await
        .unwrap();
    let err = commands
        .add_org_password_complexity_policy(&ctx, "org-1", strict())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let changed = commands
        .change_org_password_complexity_policy(&ctx, "org-1", PasswordComplexityPolicy::new(12))
        .await
        .unwrap();
    assert_eq!(changed.details.resource_owner, "org-1");

    let removed = commands
        .remove_org_password_complexity_policy(&ctx, "org-1")
        .await
        .unwrap();
    assert_eq!(removed.sequence, Sequence::new(3));

    let err = commands
        .remove_org_password_complexity_policy(&ctx, "org-1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // A removed policy can be added again.
    commands
        .add_org_password_complexity_policy(&ctx, "org-1", strict())
        .await
        .unwrap();
    assert_eq!(store.len(), 4);
}

#[tokio::test]
async fn org_policy_does_not_conflict_with_other_org_events() {
    let (store, commands) = setup();
    let ctx = ctx();
    let org = Aggregate::new("INSTANCE", "org", "org-1", "org-1");
    store
        .push(None, vec![PendingEvent::new(org, "org.added", "setup", json!({"name": "ACME"}))])
        .await
        .unwrap();

    let added = commands
        .add_org_password_complexity_policy(&ctx, "org-1", strict())
        .await
        .unwrap();

    assert_eq!(added.details.sequence, Sequence::new(2));
}

#[tokio::test]
async fn policies_are_isolated_per_instance() {
    let (store, commands) = setup();
    given_default_policy(&store, strict()).await;

    let other = CommandContext::new("OTHER", "admin");
    let result = commands
        .add_default_password_complexity_policy(&other, strict())
        .await
        .unwrap();

    assert_eq!(result.details.aggregate_id, "OTHER");
    assert_eq!(result.details.sequence, Sequence::new(1));
}

#[tokio::test]
async fn storage_failure_propagates_untouched() {
    let (store, commands) = setup();
    store.fail_next(EventStoreError::DatabaseError("connection reset".to_string()));

    let err = commands
        .add_default_password_complexity_policy(&ctx(), strict())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommandError::Storage(EventStoreError::DatabaseError(ref msg)) if msg == "connection reset"
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn corrupt_event_fails_the_load() {
    let (store, commands) = setup();
    let org = Aggregate::new("INSTANCE", "org", "org-1", "org-1");
    store
        .push(
            None,
            vec![PendingEvent::new(
                org,
                <OrgPasswordComplexityPolicyAdded as sourced_iam_core::event::Event>::EVENT_TYPE,
                "setup",
                json!({"minLength": "eight"}),
            )],
        )
        .await
        .unwrap();

    let err = commands
        .change_org_password_complexity_policy(&ctx(), "org-1", strict())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Corruption);
}
