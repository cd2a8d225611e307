//! Pipeline states and the transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a run currently stands.
///
/// The host starts fully "dressed" and is progressively stripped of
/// conflicting processes until the workload runs on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    /// Nothing has been touched yet.
    Dressed,
    /// The host's identity has been verified.
    Peeping,
    /// The pre-pipeline process table has been captured.
    Snapshotted,
    /// Conflicting processes have been stopped.
    Undressed,
    /// The dead man's switch is armed.
    PreLaunch,
    /// The workload is running.
    Launched,
    /// Terminal: the run succeeded and the switch was disarmed.
    Complete,
    /// Terminal: the run was abandoned.
    Aborted,
}

/// Every forward edge. `ABORTED` is reachable from any non-terminal state
/// and is checked separately.
pub const TRANSITIONS: &[(PipelineState, PipelineState)] = &[
    (PipelineState::Dressed, PipelineState::Peeping),
    (PipelineState::Peeping, PipelineState::Snapshotted),
    (PipelineState::Snapshotted, PipelineState::Undressed),
    (PipelineState::Undressed, PipelineState::PreLaunch),
    (PipelineState::PreLaunch, PipelineState::Launched),
    (PipelineState::Launched, PipelineState::Complete),
];

/// All states, in pipeline order.
pub const ALL_STATES: &[PipelineState] = &[
    PipelineState::Dressed,
    PipelineState::Peeping,
    PipelineState::Snapshotted,
    PipelineState::Undressed,
    PipelineState::PreLaunch,
    PipelineState::Launched,
    PipelineState::Complete,
    PipelineState::Aborted,
];

impl PipelineState {
    /// The state every run starts in.
    pub const INITIAL: Self = Self::Dressed;

    /// Canonical name as written to audit records.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dressed => "DRESSED",
            Self::Peeping => "PEEPING",
            Self::Snapshotted => "SNAPSHOTTED",
            Self::Undressed => "UNDRESSED",
            Self::PreLaunch => "PRE_LAUNCH",
            Self::Launched => "LAUNCHED",
            Self::Complete => "COMPLETE",
            Self::Aborted => "ABORTED",
        }
    }

    /// Returns true for `COMPLETE` and `ABORTED`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// The designated forward successor, if any.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, to)| *to)
    }

    /// Returns true if `self -> to` is allowed.
    #[must_use]
    pub fn can_transition_to(&self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Aborted || TRANSITIONS.contains(&(*self, to))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_chain_reaches_complete() {
        let mut state = PipelineState::INITIAL;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(state, PipelineState::Complete);
        assert_eq!(visited.len(), 7);
    }

    #[test]
    fn test_abort_from_every_non_terminal_state() {
        for state in ALL_STATES {
            assert_eq!(
                state.can_transition_to(PipelineState::Aborted),
                !state.is_terminal(),
                "{state}"
            );
        }
    }

    #[test]
    fn test_no_backward_or_skipping_edges() {
        assert!(!PipelineState::Peeping.can_transition_to(PipelineState::Dressed));
        assert!(!PipelineState::Dressed.can_transition_to(PipelineState::Launched));
        assert!(!PipelineState::Complete.can_transition_to(PipelineState::Aborted));
        assert!(!PipelineState::Aborted.can_transition_to(PipelineState::Dressed));
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_string(&PipelineState::PreLaunch).unwrap(), r#""PRE_LAUNCH""#);
        for state in ALL_STATES {
            let json = serde_json::to_string(state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
    }
}
