//! Builders for committed events used in write-model and projection tests.

use crate::mocks::test_clock;
use serde::Serialize;
use serde_json::Value;
use sourced_iam_core::aggregate::{AggregateType, Sequence};
use sourced_iam_core::environment::Clock;
use sourced_iam_core::event::{Event, StoredEvent};

/// Fluent builder for [`StoredEvent`]s.
///
/// Defaults: instance `"INSTANCE"`, sequence and position 1, the fixed test
/// clock's time, editor `"editor"`, empty payload, resource owner equal to
/// the aggregate id.
///
/// # Example
///
/// ```
/// use sourced_iam_testing::fixtures::EventBuilder;
/// use serde_json::json;
///
/// let event = EventBuilder::new("org", "org-1", "org.member.added")
///     .sequence(2)
///     .payload(json!({"userId": "u1", "roles": ["ORG_OWNER"]}))
///     .build();
///
/// assert_eq!(event.resource_owner, "org-1");
/// assert_eq!(event.sequence.value(), 2);
/// ```
#[derive(Clone, Debug)]
pub struct EventBuilder {
    event: StoredEvent,
}

impl EventBuilder {
    /// Start building an event of `event_type` for the given aggregate.
    #[must_use]
    pub fn new(aggregate_type: &str, aggregate_id: &str, event_type: &str) -> Self {
        Self {
            event: StoredEvent {
                instance_id: "INSTANCE".to_string(),
                resource_owner: aggregate_id.to_string(),
                aggregate_type: AggregateType::new(aggregate_type),
                aggregate_id: aggregate_id.to_string(),
                event_type: event_type.to_string(),
                sequence: Sequence::new(1),
                position: 1,
                created_at: test_clock().now(),
                editor: "editor".to_string(),
                payload: Value::Object(serde_json::Map::new()),
            },
        }
    }

    /// Start building a typed event; the payload is serialized from `event`.
    ///
    /// # Panics
    ///
    /// Panics if `event` cannot be serialized.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn typed<E: Event>(aggregate_type: &str, aggregate_id: &str, event: &E) -> Self {
        Self::new(aggregate_type, aggregate_id, E::EVENT_TYPE)
            .payload(event.to_payload().expect("test event should serialize"))
    }

    /// Set the instance.
    #[must_use]
    pub fn instance(mut self, instance_id: &str) -> Self {
        self.event.instance_id = instance_id.to_string();
        self
    }

    /// Set the resource owner.
    #[must_use]
    pub fn resource_owner(mut self, owner: &str) -> Self {
        self.event.resource_owner = owner.to_string();
        self
    }

    /// Set the per-aggregate sequence.
    #[must_use]
    pub const fn sequence(mut self, sequence: u64) -> Self {
        self.event.sequence = Sequence::new(sequence);
        self
    }

    /// Set the global position.
    #[must_use]
    pub const fn position(mut self, position: u64) -> Self {
        self.event.position = position;
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.event.payload = payload;
        self
    }

    /// Set the payload from any serializable value.
    ///
    /// # Panics
    ///
    /// Panics if `payload` cannot be serialized.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn payload_of<T: Serialize>(self, payload: &T) -> Self {
        self.payload(serde_json::to_value(payload).expect("test payload should serialize"))
    }

    /// Set the creation date.
    #[must_use]
    pub const fn created_at(mut self, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        self.event.created_at = created_at;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> StoredEvent {
        self.event
    }
}
