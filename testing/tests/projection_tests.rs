//! Tests for projection testing utilities

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sourced_iam_core::aggregate::AggregateType;
use sourced_iam_core::event::StoredEvent;
use sourced_iam_core::projection::{
    Column, ColumnValue, EventPosition, FailedEventSink, Projection, ProjectionCheckpoint,
    ProjectionReducers, ProjectionStore, RowMutation,
};
use sourced_iam_testing::fixtures::EventBuilder;
use sourced_iam_testing::{InMemoryFailedEvents, InMemoryProjectionStore, ProjectionTestHarness};

const TABLE: &str = "labels";

#[derive(Deserialize)]
struct LabelSet {
    id: String,
    text: String,
}

#[derive(Deserialize)]
struct LabelRemoved {
    id: String,
}

// Simple projection for testing
struct LabelProjection {
    reducers: ProjectionReducers,
}

impl LabelProjection {
    fn new() -> Self {
        Self {
            reducers: ProjectionReducers::new()
                .on_type("label.set", |event: &StoredEvent, label: LabelSet| {
                    Ok(vec![RowMutation::Upsert {
                        table: TABLE,
                        key: vec![
                            Column::new("instance_id", event.instance_id.as_str()),
                            Column::new("id", label.id),
                        ],
                        values: vec![Column::new("text", label.text)],
                    }])
                })
                .on_type("label.removed", |event: &StoredEvent, removed: LabelRemoved| {
                    Ok(vec![RowMutation::Delete {
                        table: TABLE,
                        key: vec![
                            Column::new("instance_id", event.instance_id.as_str()),
                            Column::new("id", removed.id),
                        ],
                    }])
                }),
        }
    }
}

impl Projection for LabelProjection {
    fn name(&self) -> &'static str {
        "label_projection"
    }

    fn aggregate_types(&self) -> Vec<AggregateType> {
        vec![AggregateType::new("label")]
    }

    fn reducers(&self) -> &ProjectionReducers {
        &self.reducers
    }

    fn tables(&self) -> &[&'static str] {
        &[TABLE]
    }
}

fn label_key(id: &str) -> [(&'static str, ColumnValue); 2] {
    [("instance_id", "INSTANCE".into()), ("id", id.into())]
}

#[tokio::test]
async fn test_upsert_overwrites_existing_row() {
    let mut harness = ProjectionTestHarness::new(LabelProjection::new());

    harness
        .given_events(vec![
            EventBuilder::new("label", "l1", "label.set")
                .payload(json!({"id": "l1", "text": "first"}))
                .build(),
            EventBuilder::new("label", "l1", "label.set")
                .sequence(2)
                .position(2)
                .payload(json!({"id": "l1", "text": "second"}))
                .build(),
        ])
        .await
        .unwrap();

    let row = harness.then_row_exists(TABLE, &label_key("l1"));
    assert_eq!(row.get("text"), Some(&ColumnValue::Text("second".to_string())));
    assert_eq!(harness.store().count(TABLE), 1);
}

#[tokio::test]
async fn test_delete_removes_row() {
    let mut harness = ProjectionTestHarness::new(LabelProjection::new());

    harness
        .given_event(
            EventBuilder::new("label", "l1", "label.set")
                .payload(json!({"id": "l1", "text": "x"}))
                .build(),
        )
        .await
        .unwrap();
    harness
        .given_event(
            EventBuilder::new("label", "l1", "label.removed")
                .sequence(2)
                .position(2)
                .payload(json!({"id": "l1"}))
                .build(),
        )
        .await
        .unwrap();

    harness.then_row_missing(TABLE, &label_key("l1"));
}

#[tokio::test]
async fn test_reapplying_events_is_idempotent() {
    let events = vec![
        EventBuilder::new("label", "l1", "label.set")
            .payload(json!({"id": "l1", "text": "a"}))
            .build(),
        EventBuilder::new("label", "l2", "label.set")
            .position(2)
            .payload(json!({"id": "l2", "text": "b"}))
            .build(),
    ];
    let mut harness = ProjectionTestHarness::new(LabelProjection::new());

    harness.given_events(events.clone()).await.unwrap();
    let first = harness.store().rows(TABLE);
    harness.given_events(events).await.unwrap();

    assert_eq!(harness.store().rows(TABLE), first);
}

#[tokio::test]
async fn test_apply_advances_checkpoint_atomically() {
    let store = InMemoryProjectionStore::new();
    let upsert = RowMutation::Upsert {
        table: TABLE,
        key: vec![Column::new("id", "l1")],
        values: vec![],
    };

    store.fail_next_apply("disk full");
    let failed = store
        .apply("p", vec![upsert.clone()], EventPosition::new(5, Utc::now()))
        .await;
    assert!(failed.is_err());
    assert_eq!(store.count(TABLE), 0);
    assert_eq!(store.load_position("p").await.unwrap(), None);

    store
        .apply("p", vec![upsert], EventPosition::new(5, Utc::now()))
        .await
        .unwrap();
    assert_eq!(store.count(TABLE), 1);
    assert_eq!(store.load_position("p").await.unwrap().unwrap().offset, 5);
}

#[tokio::test]
async fn test_clear_drops_tables_and_checkpoint() {
    let mut harness = ProjectionTestHarness::new(LabelProjection::new());
    harness
        .given_event(
            EventBuilder::new("label", "l1", "label.set")
                .payload(json!({"id": "l1", "text": "a"}))
                .build(),
        )
        .await
        .unwrap();

    let store = harness.store().clone();
    store.clear("label_projection", vec![TABLE]).await.unwrap();

    assert_eq!(store.count(TABLE), 0);
    assert_eq!(store.load_position("label_projection").await.unwrap(), None);
}

#[tokio::test]
async fn test_undecodable_event_surfaces_error() {
    let mut harness = ProjectionTestHarness::new(LabelProjection::new());
    let result = harness
        .given_event(
            EventBuilder::new("label", "l1", "label.set")
                .payload(json!({"id": 7}))
                .build(),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(harness.store().count(TABLE), 0);
}

#[tokio::test]
async fn test_failed_events_are_recorded() {
    let sink = InMemoryFailedEvents::new();
    let event = EventBuilder::new("label", "l1", "label.set").build();

    sink.record("label_projection", &event, "boom").await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].projection_name, "label_projection");
    assert_eq!(records[0].event, event);
}
