//! Command errors.

use crate::crypto::CryptoError;
use sourced_iam_core::aggregate::Sequence;
use sourced_iam_core::event::EventError;
use sourced_iam_core::event_store::EventStoreError;
use thiserror::Error;

/// Coarse classification of a [`CommandError`], for mapping to API status codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request itself is malformed.
    InvalidArgument,
    /// The targeted object does not exist.
    NotFound,
    /// The object to create already exists.
    AlreadyExists,
    /// The request would not change anything, or the object is in the wrong state.
    PreconditionFailed,
    /// Another writer changed the aggregate since it was loaded.
    Concurrency,
    /// The event log failed.
    Storage,
    /// A stored event cannot be decoded.
    Corruption,
    /// A secret could not be encrypted.
    Internal,
}

/// Errors returned by commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// A request argument failed validation. Storage was not touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The targeted object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The object to create already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The request would not change the object, or it is in the wrong state.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// The aggregate moved on between load and push.
    #[error("Concurrent modification of {aggregate}: expected sequence {expected}, found {actual}")]
    Concurrency {
        /// Aggregate key (`instance/type/id`).
        aggregate: String,
        /// Sequence the command decided on.
        expected: Sequence,
        /// Sequence found at push time.
        actual: Sequence,
    },

    /// The event log failed; the error is passed through untouched.
    #[error("Storage error: {0}")]
    Storage(#[source] EventStoreError),

    /// A stored event could not be decoded while loading a write model.
    #[error("Corrupt event: {0}")]
    Corruption(#[source] EventError),

    /// Secret encryption failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl CommandError {
    /// Classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Self::Concurrency { .. } => ErrorKind::Concurrency,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Corruption(_) => ErrorKind::Corruption,
            Self::Crypto(_) => ErrorKind::Internal,
        }
    }

    /// Whether running the whole command again may succeed.
    ///
    /// True for concurrency conflicts and transient database failures.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Concurrency { .. } => true,
            Self::Storage(error) => error.is_retryable(),
            _ => false,
        }
    }
}

impl From<EventStoreError> for CommandError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::ConcurrencyConflict {
                aggregate,
                expected,
                actual,
            } => Self::Concurrency {
                aggregate: aggregate.to_string(),
                expected,
                actual,
            },
            other => Self::Storage(other),
        }
    }
}

impl From<EventError> for CommandError {
    fn from(error: EventError) -> Self {
        match error {
            EventError::Serialization { .. } => {
                Self::Storage(EventStoreError::SerializationError(error.to_string()))
            }
            EventError::Corruption { .. } => Self::Corruption(error),
        }
    }
}
