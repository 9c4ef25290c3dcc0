//! Concurrency, deadlines and retries across the command pipeline.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use sourced_iam_command::member::OrgMemberWriteModel;
use sourced_iam_command::retry::{RetryPolicy, retry_on_conflict};
use sourced_iam_command::{CommandContext, CommandError, Commands, ErrorKind, SecretCrypto};
use sourced_iam_core::aggregate::Sequence;
use sourced_iam_core::event_store::EventStoreError;
use sourced_iam_testing::InMemoryEventStore;
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Arc<InMemoryEventStore>, Commands) {
    sourced_iam_testing::init_test_tracing();
    let store = Arc::new(InMemoryEventStore::new());
    let crypto = SecretCrypto::new("key-1", &[1u8; 32]).expect("valid key");
    (store.clone(), Commands::new(store, crypto))
}

fn ctx() -> CommandContext {
    CommandContext::new("INSTANCE", "admin")
}

fn roles(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn exactly_one_of_two_concurrent_writers_wins() {
    let (store, commands) = setup();
    let ctx = ctx();

    let (a, b) = tokio::join!(
        commands.add_org_member(&ctx, "org-1", "user-a", roles(&["ORG_OWNER"])),
        commands.add_org_member(&ctx, "org-1", "user-b", roles(&["ORG_OWNER"])),
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);

    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser.kind(), ErrorKind::Concurrency);
    assert!(loser.is_retryable());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn retrying_the_loser_succeeds_on_fresh_state() {
    let (store, commands) = setup();
    let ctx = ctx();
    let policy = RetryPolicy::builder().initial_delay(Duration::from_millis(1)).build();

    let (a, b) = tokio::join!(
        retry_on_conflict(policy.clone(), || {
            commands.add_org_member(&ctx, "org-1", "user-a", roles(&["ORG_OWNER"]))
        }),
        retry_on_conflict(policy.clone(), || {
            commands.add_org_member(&ctx, "org-1", "user-b", roles(&["ORG_USER_MANAGER"]))
        }),
    );

    let mut sequences = vec![a.unwrap().sequence, b.unwrap().sequence];
    sequences.sort();
    assert_eq!(sequences, vec![Sequence::new(1), Sequence::new(2)]);
    assert_eq!(store.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_writers_keep_sequences_gapless() {
    let (store, commands) = setup();
    let policy = RetryPolicy::builder()
        .max_retries(50)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .build();

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let commands = commands.clone();
            let policy = policy.clone();
            tokio::spawn(async move {
                let ctx = ctx();
                let user = format!("user-{n}");
                retry_on_conflict(policy, || commands.add_org_member(&ctx, "org-1", &user, roles(&["ORG_OWNER"])))
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.expect("task should not panic").unwrap();
    }

    let sequences: Vec<u64> = store.events().iter().map(|e| e.sequence.value()).collect();
    assert_eq!(sequences, (1..=8).collect::<Vec<_>>());
}

#[tokio::test]
async fn member_lifecycle() {
    let (store, commands) = setup();
    let ctx = ctx();

    commands
        .add_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER"]))
        .await
        .unwrap();

    let err = commands
        .add_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let err = commands
        .change_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER", "ORG_OWNER"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

    commands
        .change_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER", "ORG_USER_MANAGER"]))
        .await
        .unwrap();

    let mut model = OrgMemberWriteModel::new("INSTANCE", "org-1", "user-1");
    commands.load(&ctx, &mut model).await.unwrap();
    assert_eq!(model.roles, roles(&["ORG_OWNER", "ORG_USER_MANAGER"]));

    commands.remove_org_member(&ctx, "org-1", "user-1").await.unwrap();
    let err = commands
        .change_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn missing_roles_are_rejected_before_storage() {
    let (store, commands) = setup();
    store.fail_next(EventStoreError::DatabaseError("must not be reached".to_string()));

    let err = commands
        .add_org_member(&ctx(), "org-1", "user-1", Vec::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn expired_deadline_pushes_nothing() {
    let (store, commands) = setup();
    let ctx = ctx().with_deadline(tokio::time::Instant::now());

    let err = commands
        .add_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Storage(EventStoreError::DeadlineExceeded)));
    assert!(!err.is_retryable());
    assert!(store.is_empty());
}

#[tokio::test]
async fn generous_deadline_does_not_interfere() {
    let (store, commands) = setup();
    let ctx = ctx().with_timeout(Duration::from_secs(30));

    commands
        .add_org_member(&ctx, "org-1", "user-1", roles(&["ORG_OWNER"]))
        .await
        .unwrap();

    assert_eq!(store.len(), 1);
}
