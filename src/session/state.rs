//! Session lifecycle states

use serde::Serialize;
use std::fmt;

/// Lifecycle state of a [`ContainerSession`](super::ContainerSession).
///
/// `Unconfigured → Configured → HeaderWritten → Finalized`, with `Failed`
/// reachable from any live state when setup hits a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unconfigured,
    Configured,
    HeaderWritten,
    Finalized,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Configured => "configured",
            SessionState::HeaderWritten => "header-written",
            SessionState::Finalized => "finalized",
            SessionState::Failed => "failed",
        }
    }

    /// Whether the sink may still hold resources that need releasing.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Configured | SessionState::HeaderWritten | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
