//! Write models: ephemeral aggregate state rebuilt from events per command.
//!
//! A write model holds a [`WriteModelBase`] (identity, processed sequence,
//! change date and a buffer of not-yet-folded events) plus the typed fields a
//! command needs to decide. Loading one is always the same three steps:
//!
//! 1. run [`WriteModel::query`] against the event store,
//! 2. [`WriteModel::append_events`] the result,
//! 3. [`WriteModel::reduce`] to fold the buffered events in order.
//!
//! # Event dispatch
//!
//! Each model type owns a static [`EventReducers`] registry mapping event-type
//! tags to a decode-and-fold function. Events with unregistered tags are
//! dropped at append time, so a query that is broader than the model's
//! interests is harmless.
//!
//! # Composition
//!
//! A model that specialises another (for example an org-scoped identity
//! provider over a generic provider model) owns the inner model and registers
//! reducers that delegate to it.
//!
//! # Example
//!
//! ```
//! use std::sync::OnceLock;
//! use serde::Deserialize;
//! use sourced_iam_core::search::{SearchQuery, SearchQueryBuilder};
//! use sourced_iam_core::write_model::{EventReducers, WriteModel, WriteModelBase};
//!
//! #[derive(Deserialize)]
//! struct Renamed {
//!     name: String,
//! }
//!
//! struct OrgNameWriteModel {
//!     base: WriteModelBase,
//!     name: Option<String>,
//! }
//!
//! impl WriteModel for OrgNameWriteModel {
//!     const AGGREGATE_TYPE: &'static str = "org";
//!
//!     fn base(&self) -> &WriteModelBase {
//!         &self.base
//!     }
//!
//!     fn base_mut(&mut self) -> &mut WriteModelBase {
//!         &mut self.base
//!     }
//!
//!     fn reducers() -> &'static EventReducers<Self> {
//!         static REDUCERS: OnceLock<EventReducers<OrgNameWriteModel>> = OnceLock::new();
//!         REDUCERS.get_or_init(|| {
//!             EventReducers::new().on_type("org.renamed", |m: &mut Self, e: Renamed| {
//!                 m.name = Some(e.name);
//!             })
//!         })
//!     }
//!
//!     fn query(&self) -> SearchQueryBuilder {
//!         self.base.search_for(Self::AGGREGATE_TYPE, Self::reducers().event_types())
//!     }
//! }
//! ```

use crate::aggregate::{AggregateKey, AggregateType, Sequence};
use crate::event::{Event, EventError, StoredEvent};
use crate::search::{SearchQuery, SearchQueryBuilder};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;

/// Identity and replay bookkeeping shared by every write model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteModelBase {
    /// Aggregate the model folds.
    pub aggregate_id: String,
    /// Resource owner scope of the aggregate.
    pub resource_owner: String,
    /// Tenant of the aggregate.
    pub instance_id: String,
    /// Sequence of the last folded event ([`Sequence::INITIAL`] when none).
    pub processed_sequence: Sequence,
    /// Creation date of the last folded event.
    pub change_date: Option<DateTime<Utc>>,
    /// Head sequence of the whole aggregate when the model was loaded.
    ///
    /// Differs from `processed_sequence` when the aggregate carries events
    /// this model does not fold.
    pub aggregate_sequence: Sequence,
    events: Vec<StoredEvent>,
}

impl WriteModelBase {
    /// Create a base for the given aggregate.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        aggregate_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            resource_owner: resource_owner.into(),
            instance_id: instance_id.into(),
            processed_sequence: Sequence::INITIAL,
            change_date: None,
            aggregate_sequence: Sequence::INITIAL,
            events: Vec::new(),
        }
    }

    /// Sequence a push decided on this model must expect.
    #[must_use]
    pub fn expected_sequence(&self) -> Sequence {
        self.processed_sequence.max(self.aggregate_sequence)
    }

    /// Events appended but not yet folded.
    #[must_use]
    pub fn pending(&self) -> &[StoredEvent] {
        &self.events
    }

    /// Buffer an event for the next fold.
    pub fn buffer(&mut self, event: StoredEvent) {
        self.events.push(event);
    }

    /// Take the buffered events, leaving the buffer empty.
    pub fn take_pending(&mut self) -> Vec<StoredEvent> {
        std::mem::take(&mut self.events)
    }

    /// Record that `event` has been folded.
    pub fn mark_processed(&mut self, event: &StoredEvent) {
        self.processed_sequence = event.sequence;
        self.change_date = Some(event.created_at);
    }

    /// Standard search for this aggregate: instance and resource owner
    /// scope, the aggregate's type and id, the given event types, resuming
    /// after the processed sequence.
    #[must_use]
    pub fn search_for<I, T>(
        &self,
        aggregate_type: impl Into<AggregateType>,
        event_types: I,
    ) -> SearchQueryBuilder
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        SearchQueryBuilder::new(self.instance_id.clone())
            .resource_owner(self.resource_owner.clone())
            .add_query(self.sub_query(aggregate_type, event_types))
    }

    /// The sub-query part of [`WriteModelBase::search_for`], for models that
    /// add further predicates (such as payload fields).
    #[must_use]
    pub fn sub_query<I, T>(&self, aggregate_type: impl Into<AggregateType>, event_types: I) -> SearchQuery
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        SearchQuery::new()
            .aggregate_types([aggregate_type.into()])
            .aggregate_ids([self.aggregate_id.clone()])
            .event_types(event_types)
            .sequence_greater(self.processed_sequence)
    }
}

type ReduceFn<M> = Box<dyn Fn(&mut M, &StoredEvent) -> Result<(), EventError> + Send + Sync>;

/// Registry from event-type tag to a decode-and-fold function for model `M`.
pub struct EventReducers<M> {
    handlers: HashMap<&'static str, ReduceFn<M>>,
}

impl<M: 'static> EventReducers<M> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a fold for the typed event `E`.
    #[must_use]
    pub fn on<E: Event>(self, fold: fn(&mut M, E)) -> Self {
        self.on_type(E::EVENT_TYPE, fold)
    }

    /// Register a fold for `event_type`, decoding the payload as `P`.
    #[must_use]
    pub fn on_type<P>(mut self, event_type: &'static str, fold: fn(&mut M, P)) -> Self
    where
        P: DeserializeOwned + 'static,
    {
        self.handlers.insert(
            event_type,
            Box::new(move |model, event| {
                let payload = event.decode::<P>()?;
                fold(model, payload);
                Ok(())
            }),
        );
        self
    }

    /// Register a fold that needs the whole stored event rather than only the
    /// payload (for example to read the editor or creation date).
    #[must_use]
    pub fn on_stored(
        mut self,
        event_type: &'static str,
        fold: fn(&mut M, &StoredEvent) -> Result<(), EventError>,
    ) -> Self {
        self.handlers.insert(event_type, Box::new(fold));
        self
    }

    /// Whether a fold is registered for `event_type`.
    #[must_use]
    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Registered event types, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Fold `event` into `model`. Unregistered tags are a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Corruption`] if the payload cannot be decoded.
    pub fn apply(&self, model: &mut M, event: &StoredEvent) -> Result<(), EventError> {
        match self.handlers.get(event.event_type.as_str()) {
            Some(fold) => fold(model, event),
            None => Ok(()),
        }
    }
}

impl<M: 'static> Default for EventReducers<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for EventReducers<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&&str> = self.handlers.keys().collect();
        types.sort_unstable();
        f.debug_struct("EventReducers").field("event_types", &types).finish()
    }
}

/// A typed aggregate state rebuilt from events for one command.
pub trait WriteModel: Sized + Send + 'static {
    /// Aggregate type the model folds.
    const AGGREGATE_TYPE: &'static str;

    /// Shared identity and bookkeeping.
    fn base(&self) -> &WriteModelBase;

    /// Shared identity and bookkeeping (mutable).
    fn base_mut(&mut self) -> &mut WriteModelBase;

    /// The model's event dispatch table.
    fn reducers() -> &'static EventReducers<Self>;

    /// Search selecting the events this model folds, resuming after the
    /// processed sequence.
    fn query(&self) -> SearchQueryBuilder;

    /// Ordering key of the folded aggregate.
    fn key(&self) -> AggregateKey {
        let base = self.base();
        AggregateKey {
            instance_id: base.instance_id.clone(),
            aggregate_type: AggregateType::new(Self::AGGREGATE_TYPE),
            aggregate_id: base.aggregate_id.clone(),
        }
    }

    /// Buffer events for the next [`WriteModel::reduce`], dropping event
    /// types the model does not handle.
    fn append_events(&mut self, events: Vec<StoredEvent>) {
        let reducers = Self::reducers();
        let base = self.base_mut();
        for event in events {
            if reducers.handles(&event.event_type) {
                base.buffer(event);
            }
        }
    }

    /// Fold buffered events in order and clear the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Corruption`] if a payload cannot be decoded; the
    /// model must then be discarded.
    fn reduce(&mut self) -> Result<(), EventError> {
        let events = self.base_mut().take_pending();
        let reducers = Self::reducers();
        for event in &events {
            reducers.apply(self, event)?;
            self.base_mut().mark_processed(event);
        }
        Ok(())
    }
}
