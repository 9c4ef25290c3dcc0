//! Per-request command context.

use std::time::Duration;
use tokio::time::Instant;

/// Who runs a command, for which tenant, and until when.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandContext {
    /// Tenant every event of the command is scoped to.
    pub instance_id: String,
    /// Recorded as the editor of every pushed event.
    pub editor: String,
    deadline: Option<Instant>,
}

impl CommandContext {
    /// Context without a deadline.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, editor: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            editor: editor.into(),
            deadline: None,
        }
    }

    /// Bound every storage call of the command by `deadline`.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Bound every storage call of the command to `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}
