//! Aggregate identification and sequencing types.
//!
//! An aggregate is identified by the tuple *(instance, aggregate type,
//! aggregate id)*. Every event appended for that tuple receives the next
//! [`Sequence`]; sequences start at 1 and never have gaps.
//!
//! The resource owner (usually an organization) is carried on every event for
//! access scoping but is **not** part of the ordering key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for [`AggregateType`] parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid aggregate type: {0}")]
pub struct ParseAggregateTypeError(String);

/// Tag naming the kind of domain entity an aggregate represents.
///
/// Examples: `"instance"`, `"org"`, `"user"`.
///
/// # Validation
///
/// - `FromStr::from_str()`: rejects empty strings
/// - `From::from()` and `new()`: no validation (trusted, application-defined tags)
///
/// # Examples
///
/// ```
/// use sourced_iam_core::aggregate::AggregateType;
///
/// let org = AggregateType::new("org");
/// assert_eq!(org.as_str(), "org");
///
/// let parsed: AggregateType = "instance".parse().unwrap();
/// assert_eq!(parsed, AggregateType::new("instance"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateType(String);

impl AggregateType {
    /// Create a new `AggregateType` from a string.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the aggregate type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `AggregateType` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateType {
    type Err = ParseAggregateTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAggregateTypeError(
                "Aggregate type cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for AggregateType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AggregateType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AggregateType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-aggregate event ordinal used for optimistic concurrency control.
///
/// An aggregate that has never been written is at [`Sequence::INITIAL`] (0).
/// The first committed event receives sequence 1, the next 2, and so on.
///
/// When pushing events the caller passes the sequence it last observed; the
/// store rejects the push if another writer advanced the aggregate meanwhile.
///
/// # Examples
///
/// ```
/// use sourced_iam_core::aggregate::Sequence;
///
/// let s0 = Sequence::INITIAL;
/// assert!(s0.is_initial());
/// assert_eq!(s0.next(), Sequence::new(1));
/// assert_eq!(Sequence::new(5) + 3, Sequence::new(8));
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// Sequence of an aggregate without events.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Sequence` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the sequence number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next sequence (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial sequence (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Sequence> for u64 {
    fn from(sequence: Sequence) -> Self {
        sequence.0
    }
}

impl std::ops::Add<u64> for Sequence {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// The ordering key of an aggregate: *(instance, type, id)*.
///
/// Two events belong to the same aggregate exactly when their keys are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Tenant the aggregate lives in.
    pub instance_id: String,
    /// Kind of domain entity.
    pub aggregate_type: AggregateType,
    /// Identifier unique within `(instance_id, aggregate_type)`.
    pub aggregate_id: String,
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.instance_id, self.aggregate_type, self.aggregate_id
        )
    }
}

/// An aggregate as seen by a writer: its key plus the resource owner that is
/// stamped on every event pushed for it.
///
/// # Examples
///
/// ```
/// use sourced_iam_core::aggregate::Aggregate;
///
/// // The instance aggregate owns itself.
/// let instance = Aggregate::new("INSTANCE", "instance", "INSTANCE", "INSTANCE");
/// assert_eq!(instance.key().aggregate_type.as_str(), "instance");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Tenant the aggregate lives in.
    pub instance_id: String,
    /// Kind of domain entity.
    pub aggregate_type: AggregateType,
    /// Identifier unique within `(instance_id, aggregate_type)`.
    pub aggregate_id: String,
    /// Owner used for access scoping (not part of the ordering key).
    pub resource_owner: String,
}

impl Aggregate {
    /// Create a new aggregate reference.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        aggregate_type: impl Into<AggregateType>,
        aggregate_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            resource_owner: resource_owner.into(),
        }
    }

    /// The ordering key of this aggregate.
    #[must_use]
    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            instance_id: self.instance_id.clone(),
            aggregate_type: self.aggregate_type.clone(),
            aggregate_id: self.aggregate_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod aggregate_type_tests {
        use super::*;

        #[test]
        #[allow(clippy::expect_used)]
        fn parse_from_str() {
            let ty: AggregateType = "org".parse().expect("parse should succeed");
            assert_eq!(ty, AggregateType::new("org"));
        }

        #[test]
        fn parse_empty_string_fails() {
            assert!("".parse::<AggregateType>().is_err());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", AggregateType::new("user")), "user");
        }
    }

    mod sequence_tests {
        use super::*;

        #[test]
        fn initial_sequence() {
            assert_eq!(Sequence::INITIAL, Sequence::new(0));
            assert_eq!(Sequence::default(), Sequence::INITIAL);
            assert!(Sequence::INITIAL.is_initial());
            assert!(!Sequence::new(1).is_initial());
        }

        #[test]
        fn next_and_add() {
            assert_eq!(Sequence::new(1).next(), Sequence::new(2));
            assert_eq!(Sequence::new(5) + 3, Sequence::new(8));
        }

        #[test]
        fn ordering() {
            assert!(Sequence::new(1) < Sequence::new(2));
            let raw: u64 = Sequence::new(42).into();
            assert_eq!(raw, 42);
        }
    }

    #[test]
    fn aggregate_key_ignores_resource_owner() {
        let a = Aggregate::new("i1", "org", "o1", "o1");
        let b = Aggregate::new("i1", "org", "o1", "someone-else");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().to_string(), "i1/org/o1");
    }
}
