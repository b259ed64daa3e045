//! Allocation state machine.

use serde::{Deserialize, Serialize};

/// The state of a multi-line allocation.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Completed
///           ├──► Compensated
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AllocationState {
    /// Lines are being locked.
    #[default]
    Pending,

    /// Every line was locked (terminal state).
    Completed,

    /// Some lines failed and the locked ones were rolled back (terminal state).
    Compensated,

    /// No line could be locked (terminal state).
    Failed,
}

impl AllocationState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AllocationState::Pending)
    }

    /// Returns true if the allocation holds locks for every line.
    pub fn is_success(&self) -> bool {
        matches!(self, AllocationState::Completed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::Pending => "Pending",
            AllocationState::Completed => "Completed",
            AllocationState::Compensated => "Compensated",
            AllocationState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for AllocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
