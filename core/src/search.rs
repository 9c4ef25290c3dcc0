//! Search/filter builder for reading events from the store.
//!
//! A [`SearchQueryBuilder`] describes which committed events a reader wants:
//!
//! - an instance scope (one tenant, or an explicit system-wide query),
//! - an optional resource owner,
//! - any number of [`SearchQuery`] sub-queries, OR'ed together; predicates
//!   inside a sub-query are AND'ed,
//! - a global position lower bound, ordering, limit and offset.
//!
//! The builder is a plain value. [`SearchQueryBuilder::matches`] and
//! [`SearchQueryBuilder::select`] define its semantics in memory; the Postgres
//! event store translates the same value into SQL.
//!
//! # Example
//!
//! ```
//! use sourced_iam_core::search::{SearchQuery, SearchQueryBuilder};
//! use serde_json::json;
//!
//! // Every event of org "org-1" that concerns identity provider "idp-1".
//! let query = SearchQueryBuilder::new("INSTANCE")
//!     .resource_owner("org-1")
//!     .add_query(
//!         SearchQuery::new()
//!             .aggregate_types(["org"])
//!             .aggregate_ids(["org-1"])
//!             .event_types(["org.idp.oauth.added", "org.idp.oauth.changed"])
//!             .event_data(json!({"id": "idp-1"})),
//!     );
//!
//! assert_eq!(query.queries().len(), 1);
//! ```

use crate::aggregate::{AggregateType, Sequence};
use crate::event::StoredEvent;
use serde_json::{Map, Value};

/// Tenant scope of a search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstanceScope {
    /// Only events of this instance.
    Instance(String),
    /// Events of every instance. Reserved for projections and tooling.
    System,
}

/// Sort direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Column the result is ordered by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderBy {
    /// Per aggregate: `(aggregate id, sequence)`.
    #[default]
    AggregateSequence,
    /// Global commit order.
    Position,
}

/// A single sub-query. All set predicates must hold for an event to match.
///
/// Empty lists mean "no restriction".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchQuery {
    aggregate_types: Vec<AggregateType>,
    aggregate_ids: Vec<String>,
    event_types: Vec<String>,
    sequence_greater: Option<Sequence>,
    sequence_at_most: Option<Sequence>,
    event_data: Map<String, Value>,
}

impl SearchQuery {
    /// Create an unrestricted sub-query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given aggregate types.
    #[must_use]
    pub fn aggregate_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<AggregateType>,
    {
        self.aggregate_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Restrict to the given aggregate ids.
    #[must_use]
    pub fn aggregate_ids<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.aggregate_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Restrict to the given event types.
    #[must_use]
    pub fn event_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.event_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Only events with a sequence strictly greater than `sequence`.
    #[must_use]
    pub const fn sequence_greater(mut self, sequence: Sequence) -> Self {
        self.sequence_greater = Some(sequence);
        self
    }

    /// Only events with a sequence less than or equal to `sequence`.
    #[must_use]
    pub const fn sequence_at_most(mut self, sequence: Sequence) -> Self {
        self.sequence_at_most = Some(sequence);
        self
    }

    /// Only events whose payload contains these top-level fields.
    ///
    /// Containment follows `jsonb @>`: scalars compare equal, objects match
    /// when every given key is contained, arrays match when every given
    /// element is contained in some element of the payload's array.
    ///
    /// Non-object values are ignored. Repeated calls merge their fields.
    #[must_use]
    pub fn event_data(mut self, data: Value) -> Self {
        if let Value::Object(fields) = data {
            self.event_data.extend(fields);
        }
        self
    }

    /// Aggregate types predicate.
    #[must_use]
    pub fn aggregate_type_filter(&self) -> &[AggregateType] {
        &self.aggregate_types
    }

    /// Aggregate ids predicate.
    #[must_use]
    pub fn aggregate_id_filter(&self) -> &[String] {
        &self.aggregate_ids
    }

    /// Event types predicate.
    #[must_use]
    pub fn event_type_filter(&self) -> &[String] {
        &self.event_types
    }

    /// Exclusive sequence lower bound.
    #[must_use]
    pub const fn sequence_greater_filter(&self) -> Option<Sequence> {
        self.sequence_greater
    }

    /// Inclusive sequence upper bound.
    #[must_use]
    pub const fn sequence_at_most_filter(&self) -> Option<Sequence> {
        self.sequence_at_most
    }

    /// Payload fields predicate (empty when unrestricted).
    #[must_use]
    pub const fn event_data_filter(&self) -> &Map<String, Value> {
        &self.event_data
    }

    /// Check whether `event` satisfies every predicate of this sub-query.
    #[must_use]
    pub fn matches(&self, event: &StoredEvent) -> bool {
        if !self.aggregate_types.is_empty() && !self.aggregate_types.contains(&event.aggregate_type)
        {
            return false;
        }
        if !self.aggregate_ids.is_empty() && !self.aggregate_ids.contains(&event.aggregate_id) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if self.sequence_greater.is_some_and(|s| event.sequence <= s) {
            return false;
        }
        if self.sequence_at_most.is_some_and(|s| event.sequence > s) {
            return false;
        }
        self.event_data
            .iter()
            .all(|(field, expected)| event.payload.get(field).is_some_and(|actual| contains(actual, expected)))
    }
}

/// `jsonb @>` for two values, without the top-level array/scalar special case.
fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual), Value::Object(expected)) => expected
            .iter()
            .all(|(key, value)| actual.get(key).is_some_and(|a| contains(a, value))),
        (Value::Array(actual), Value::Array(expected)) => expected
            .iter()
            .all(|value| actual.iter().any(|a| contains(a, value))),
        _ => actual == expected,
    }
}

/// Builder for an event search.
///
/// Can only be created with [`SearchQueryBuilder::new`] (one instance) or
/// [`SearchQueryBuilder::system`] (all instances), so every read states its
/// tenant scope explicitly.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchQueryBuilder {
    scope: InstanceScope,
    resource_owner: Option<String>,
    queries: Vec<SearchQuery>,
    position_after: Option<u64>,
    order_by: OrderBy,
    sort: SortOrder,
    limit: Option<u64>,
    offset: u64,
}

impl SearchQueryBuilder {
    /// Search within a single instance.
    #[must_use]
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self::with_scope(InstanceScope::Instance(instance_id.into()))
    }

    /// Search across every instance.
    #[must_use]
    pub const fn system() -> Self {
        Self::with_scope(InstanceScope::System)
    }

    const fn with_scope(scope: InstanceScope) -> Self {
        Self {
            scope,
            resource_owner: None,
            queries: Vec::new(),
            position_after: None,
            order_by: OrderBy::AggregateSequence,
            sort: SortOrder::Ascending,
            limit: None,
            offset: 0,
        }
    }

    /// Restrict to events of one resource owner.
    #[must_use]
    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    /// Add a sub-query. Sub-queries are OR'ed; a builder without sub-queries
    /// matches every event in scope.
    #[must_use]
    pub fn add_query(mut self, query: SearchQuery) -> Self {
        self.queries.push(query);
        self
    }

    /// Only events with a global position strictly greater than `position`.
    #[must_use]
    pub const fn position_after(mut self, position: u64) -> Self {
        self.position_after = Some(position);
        self
    }

    /// Order by global position instead of `(aggregate id, sequence)`.
    #[must_use]
    pub const fn order_by_position(mut self) -> Self {
        self.order_by = OrderBy::Position;
        self
    }

    /// Return newest events first.
    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.sort = SortOrder::Descending;
        self
    }

    /// Return at most `limit` events.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` matching events.
    #[must_use]
    pub const fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Tenant scope.
    #[must_use]
    pub const fn scope(&self) -> &InstanceScope {
        &self.scope
    }

    /// Resource owner restriction.
    #[must_use]
    pub fn resource_owner_filter(&self) -> Option<&str> {
        self.resource_owner.as_deref()
    }

    /// Sub-queries.
    #[must_use]
    pub fn queries(&self) -> &[SearchQuery] {
        &self.queries
    }

    /// Exclusive global position lower bound.
    #[must_use]
    pub const fn position_after_filter(&self) -> Option<u64> {
        self.position_after
    }

    /// Ordering column.
    #[must_use]
    pub const fn ordering(&self) -> OrderBy {
        self.order_by
    }

    /// Sort direction.
    #[must_use]
    pub const fn sort_order(&self) -> SortOrder {
        self.sort
    }

    /// Row limit, if any.
    #[must_use]
    pub const fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Row offset.
    #[must_use]
    pub const fn offset_value(&self) -> u64 {
        self.offset
    }

    /// Check whether `event` is selected by this search, ignoring ordering and
    /// pagination.
    #[must_use]
    pub fn matches(&self, event: &StoredEvent) -> bool {
        if let InstanceScope::Instance(instance_id) = &self.scope {
            if event.instance_id != *instance_id {
                return false;
            }
        }
        if let Some(owner) = &self.resource_owner {
            if event.resource_owner != *owner {
                return false;
            }
        }
        if self.position_after.is_some_and(|p| event.position <= p) {
            return false;
        }
        self.queries.is_empty() || self.queries.iter().any(|q| q.matches(event))
    }

    /// Apply the full search (filter, order, offset, limit) to `events`.
    pub fn select<'a, I>(&self, events: I) -> Vec<StoredEvent>
    where
        I: IntoIterator<Item = &'a StoredEvent>,
    {
        let mut selected: Vec<StoredEvent> = events
            .into_iter()
            .filter(|event| self.matches(event))
            .cloned()
            .collect();

        match self.order_by {
            OrderBy::AggregateSequence => selected.sort_by(|a, b| {
                (&a.aggregate_id, a.sequence, a.position).cmp(&(&b.aggregate_id, b.sequence, b.position))
            }),
            OrderBy::Position => selected.sort_by_key(|event| event.position),
        }
        if self.sort == SortOrder::Descending {
            selected.reverse();
        }

        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        selected.into_iter().skip(offset).take(limit).collect()
    }
}
