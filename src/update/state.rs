//! Update cycle states

use serde::{Deserialize, Serialize};

use super::error::{FailureKind, UpdateError};

/// Why a cycle ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl CycleFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(error: &UpdateError) -> Self {
        Self::new(error.failure_kind(), error.to_string())
    }
}

impl std::fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failure: {}", self.kind, self.message)
    }
}

/// State of the update state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UpdateCycleState {
    /// No cycle in progress
    Idle,
    /// Fetching the manifest
    Checking,
    /// Streaming the package to disk
    Downloading,
    /// Checking checksum and signature
    Verifying,
    /// Verified package waiting for confirmation
    ReadyToInstall,
    /// Installer handoff in progress
    Installing,
    /// Cycle failed
    Failed(CycleFailure),
    /// Cycle cancelled
    Cancelled,
}

impl Default for UpdateCycleState {
    fn default() -> Self {
        UpdateCycleState::Idle
    }
}

impl UpdateCycleState {
    /// Check if the state allows cancellation
    pub fn can_cancel(&self) -> bool {
        matches!(
            self,
            UpdateCycleState::Checking
                | UpdateCycleState::Downloading
                | UpdateCycleState::Verifying
                | UpdateCycleState::ReadyToInstall
        )
    }

    /// Check if the state ends a cycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateCycleState::Idle | UpdateCycleState::Failed(_) | UpdateCycleState::Cancelled
        )
    }

    /// Check if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &UpdateCycleState) -> bool {
        use UpdateCycleState::*;

        if self.can_cancel() && matches!(next, Cancelled) {
            return true;
        }

        match (self, next) {
            (Idle, Checking) => true,
            (Checking, Downloading | Idle | Failed(_)) => true,
            (Downloading, Verifying | Failed(_)) => true,
            (Verifying, ReadyToInstall | Failed(_)) => true,
            (ReadyToInstall, Installing | Idle) => true,
            (Installing, Idle | Failed(_)) => true,
            (Failed(_), Idle) => true,
            (Cancelled, Idle) => true,
            _ => false,
        }
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            UpdateCycleState::Idle => "idle",
            UpdateCycleState::Checking => "checking",
            UpdateCycleState::Downloading => "downloading",
            UpdateCycleState::Verifying => "verifying",
            UpdateCycleState::ReadyToInstall => "ready_to_install",
            UpdateCycleState::Installing => "installing",
            UpdateCycleState::Failed(_) => "failed",
            UpdateCycleState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for UpdateCycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateCycleState::Failed(failure) => write!(f, "failed ({})", failure),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed() -> UpdateCycleState {
        UpdateCycleState::Failed(CycleFailure::new(FailureKind::Network, "refused"))
    }

    #[test]
    fn test_happy_path_transitions() {
        use UpdateCycleState::*;
        let path = [Idle, Checking, Downloading, Verifying, ReadyToInstall, Installing, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use UpdateCycleState::*;
        assert!(!Idle.can_transition_to(&Downloading));
        assert!(!Checking.can_transition_to(&ReadyToInstall));
        assert!(!Downloading.can_transition_to(&Idle));
        assert!(!Installing.can_transition_to(&Cancelled));
        assert!(!Idle.can_transition_to(&Cancelled));
        assert!(!failed().can_transition_to(&Checking));
    }

    #[test]
    fn test_cancel_and_reset() {
        use UpdateCycleState::*;
        for state in [Checking, Downloading, Verifying, ReadyToInstall] {
            assert!(state.can_cancel());
            assert!(state.can_transition_to(&Cancelled));
        }
        assert!(!Installing.can_cancel());
        assert!(Cancelled.can_transition_to(&Idle));
        assert!(failed().can_transition_to(&Idle));
    }

    #[test]
    fn test_terminal_states() {
        assert!(UpdateCycleState::Idle.is_terminal());
        assert!(UpdateCycleState::Cancelled.is_terminal());
        assert!(failed().is_terminal());
        assert!(!UpdateCycleState::ReadyToInstall.is_terminal());
        assert!(!UpdateCycleState::Installing.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(failed()).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["kind"], "network");

        let json = serde_json::to_value(UpdateCycleState::ReadyToInstall).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "ready_to_install" }));
    }
}
