//! Event trait and the pending/committed event records.
//!
//! Events are immutable facts about an aggregate. A domain event is a plain
//! serde type implementing [`Event`]; before it is pushed it is wrapped into a
//! [`PendingEvent`] (aggregate + editor + JSON payload), and once the store
//! commits it, it comes back as a [`StoredEvent`] carrying its sequence,
//! global position and creation timestamp.
//!
//! # Payload encoding
//!
//! Payloads are stored as JSON objects. The search builder can select events
//! by top-level payload fields (for example every event whose payload `id` is
//! a given identity provider), which requires a self-describing encoding.
//!
//! # Example
//!
//! ```
//! use sourced_iam_core::aggregate::Aggregate;
//! use sourced_iam_core::event::{Event, PendingEvent};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct OrgAdded {
//!     name: String,
//! }
//!
//! impl Event for OrgAdded {
//!     const EVENT_TYPE: &'static str = "org.added";
//! }
//!
//! let org = Aggregate::new("INSTANCE", "org", "org-1", "org-1");
//! let pending = PendingEvent::from_event(&org, "user-1", &OrgAdded { name: "ACME".into() }).unwrap();
//! assert_eq!(pending.event_type, "org.added");
//! assert_eq!(pending.payload["name"], "ACME");
//! ```

use crate::aggregate::{Aggregate, AggregateKey, AggregateType, Sequence};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Error types for event encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize a domain event into its payload.
    #[error("Failed to serialize event {event_type}: {reason}")]
    Serialization {
        /// Event type tag being serialized.
        event_type: String,
        /// Underlying serde error.
        reason: String,
    },

    /// A stored payload could not be decoded into its expected shape.
    ///
    /// The event log is append-only and written exclusively through typed
    /// events, so this indicates data corruption rather than a caller error.
    #[error("Corrupt event {event_type} at {aggregate} sequence {sequence}: {reason}")]
    Corruption {
        /// Event type tag of the offending event.
        event_type: String,
        /// Aggregate the event belongs to.
        aggregate: String,
        /// Sequence of the offending event.
        sequence: u64,
        /// Underlying serde error.
        reason: String,
    },
}

/// A domain event that can be pushed to the event store.
///
/// The type tag is a stable string such as `"policy.password.added"`. It is
/// stored next to the payload and used to route committed events to the
/// right decoder when replaying write models and projections.
///
/// Payload structs should use `#[serde(rename_all = "camelCase")]`; the tag
/// never appears inside the payload.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type tag of this event.
    const EVENT_TYPE: &'static str;

    /// Serialize this event into its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if serde fails (for example a map
    /// with non-string keys).
    fn to_payload(&self) -> Result<Value, EventError> {
        serde_json::to_value(self).map_err(|e| EventError::Serialization {
            event_type: Self::EVENT_TYPE.to_string(),
            reason: e.to_string(),
        })
    }
}

/// An event waiting to be committed.
///
/// Sequence, position and creation date are assigned by the store when the
/// batch is committed.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    /// Aggregate the event is pushed to (including its resource owner).
    pub aggregate: Aggregate,

    /// Event type tag (e.g. `"org.idp.oauth.added"`).
    pub event_type: String,

    /// Identity of whoever caused the event (usually a user id).
    pub editor: String,

    /// JSON payload.
    pub payload: Value,
}

impl PendingEvent {
    /// Create a pending event from raw parts.
    #[must_use]
    pub fn new(
        aggregate: Aggregate,
        event_type: impl Into<String>,
        editor: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            aggregate,
            event_type: event_type.into(),
            editor: editor.into(),
            payload,
        }
    }

    /// Create a pending event from a typed domain event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event cannot be serialized.
    pub fn from_event<E: Event>(
        aggregate: &Aggregate,
        editor: &str,
        event: &E,
    ) -> Result<Self, EventError> {
        Ok(Self {
            aggregate: aggregate.clone(),
            event_type: E::EVENT_TYPE.to_string(),
            editor: editor.to_string(),
            payload: event.to_payload()?,
        })
    }

    /// Ordering key of the target aggregate.
    #[must_use]
    pub fn key(&self) -> AggregateKey {
        self.aggregate.key()
    }
}

impl fmt::Display for PendingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PendingEvent {{ type: {}, aggregate: {} }}",
            self.event_type,
            self.aggregate.key()
        )
    }
}

/// A committed event as read back from the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Tenant of the aggregate.
    pub instance_id: String,
    /// Owner used for access scoping.
    pub resource_owner: String,
    /// Kind of aggregate.
    pub aggregate_type: AggregateType,
    /// Aggregate identifier.
    pub aggregate_id: String,
    /// Event type tag.
    pub event_type: String,
    /// Per-aggregate ordinal, starting at 1.
    pub sequence: Sequence,
    /// Global ordinal across the whole log, used by projection checkpoints.
    pub position: u64,
    /// Commit timestamp assigned by the store.
    pub created_at: DateTime<Utc>,
    /// Identity of whoever caused the event.
    pub editor: String,
    /// JSON payload.
    pub payload: Value,
}

impl StoredEvent {
    /// Ordering key of the aggregate this event belongs to.
    #[must_use]
    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            instance_id: self.instance_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
        }
    }

    /// Check whether this event carries the type tag of `E`.
    #[must_use]
    pub fn is<E: Event>(&self) -> bool {
        self.event_type == E::EVENT_TYPE
    }

    /// Decode the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Corruption`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        T::deserialize(&self.payload).map_err(|e| EventError::Corruption {
            event_type: self.event_type.clone(),
            aggregate: self.key().to_string(),
            sequence: self.sequence.value(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoredEvent {{ type: {}, aggregate: {}, sequence: {}, position: {} }}",
            self.event_type,
            self.key(),
            self.sequence,
            self.position
        )
    }
}
