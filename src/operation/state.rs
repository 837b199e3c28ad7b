//! Lifecycle state machine for a download operation.

use std::fmt;

use serde::Serialize;

/// The single source of truth for where an operation is in its lifecycle.
///
/// `Succeeded`, `Failed` and `Cancelled` are terminal; once reached, no
/// transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// Created, transport not opened yet.
    Idle,
    /// Transport opened; events are flowing.
    Running,
    /// Finished with a payload.
    Succeeded,
    /// Finished with a transport or policy error.
    Failed,
    /// Finished because it was cancelled.
    Cancelled,
}

impl OperationState {
    /// Returns true for any terminal state.
    #[must_use]
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns true while the transport may still emit events.
    #[must_use]
    pub fn is_running(self) -> bool {
        self == Self::Running
    }

    /// Returns true when `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Running | Self::Cancelled | Self::Failed) => true,
            (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }

    /// Returns a stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OperationState; 5] = [
        OperationState::Idle,
        OperationState::Running,
        OperationState::Succeeded,
        OperationState::Failed,
        OperationState::Cancelled,
    ];

    #[test]
    fn test_idle_can_start_or_cancel() {
        assert!(OperationState::Idle.can_transition_to(OperationState::Running));
        assert!(OperationState::Idle.can_transition_to(OperationState::Cancelled));
        assert!(!OperationState::Idle.can_transition_to(OperationState::Succeeded));
    }

    #[test]
    fn test_running_reaches_every_terminal_state() {
        for next in [
            OperationState::Succeeded,
            OperationState::Failed,
            OperationState::Cancelled,
        ] {
            assert!(OperationState::Running.can_transition_to(next), "{next}");
        }
        assert!(!OperationState::Running.can_transition_to(OperationState::Idle));
    }

    #[test]
    fn test_terminal_states_have_no_successor() {
        for from in ALL.iter().copied().filter(|s| s.is_finished()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_no_self_transitions() {
        for state in ALL {
            assert!(!state.can_transition_to(state), "{state}");
        }
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(OperationState::Cancelled.to_string(), "cancelled");
        assert_eq!(OperationState::Running.as_str(), "running");
    }
}
