//! # Sourced IAM Command
//!
//! The write side of the IAM engine: every command runs the same pipeline
//!
//! ```text
//! validate ─▶ load write model ─▶ diff ─▶ push(expected sequence) ─▶ details
//! ```
//!
//! and exits early with a typed [`CommandError`]. Validation never touches
//! storage; storage errors propagate untouched; a concurrent writer surfaces
//! as [`CommandError::Concurrency`] and is never retried inside the pipeline.
//! Callers that want to retry wrap the call in [`retry::retry_on_conflict`].
//!
//! ## Example
//!
//! ```ignore
//! use sourced_iam_command::{CommandContext, Commands, PasswordComplexityPolicy};
//!
//! let commands = Commands::new(event_store, crypto);
//! let ctx = CommandContext::new("INSTANCE", "admin");
//!
//! let policy = commands
//!     .add_default_password_complexity_policy(&ctx, PasswordComplexityPolicy::new(8))
//!     .await?;
//! assert_eq!(policy.details.sequence.value(), 1);
//! ```

pub mod commands;
pub mod context;
pub mod crypto;
pub mod error;
pub mod idp;
pub mod member;
pub mod password_policy;
pub mod retry;

pub use commands::{Commands, ObjectDetails, UuidGenerator};
pub use context::CommandContext;
pub use crypto::{CryptoError, EncryptedSecret, SecretCrypto};
pub use error::{CommandError, ErrorKind};
pub use password_policy::{PasswordComplexityPolicy, PasswordComplexityPolicyDetails};
