//! Session state owned by the controller, and the snapshot it publishes

use serde::Serialize;

use crate::catalog::{Step, StepId};
use crate::resolver::ElementHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum TourState {
    Idle,
    /// Waiting for dashboard data and the settle delay
    Preparing,
    /// Showing (or locating the anchor of) step `i`
    Active(usize),
    /// Waiting for a UI transition while leaving step `i`
    Paused(usize),
    Finished,
    Skipped,
}

impl TourState {
    pub fn step_index(&self) -> Option<usize> {
        match self {
            TourState::Active(i) | TourState::Paused(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TourState::Finished | TourState::Skipped)
    }
}

/// Banner-worthy conditions the host may surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", content = "step", rename_all = "snake_case")]
pub enum Notice {
    /// Data never loaded within the configured bound
    DataUnavailable,
    /// The anchor for this step never appeared; the tour moved on
    StepSkipped(StepId),
}

#[derive(Debug, Clone)]
pub struct TourSession {
    state: TourState,
    step_index: usize,
    retry_counters: Vec<u32>,
    completion_written: bool,
}

impl TourSession {
    pub fn new(total_steps: usize) -> Self {
        Self {
            state: TourState::Idle,
            step_index: 0,
            retry_counters: vec![0; total_steps],
            completion_written: false,
        }
    }

    pub fn state(&self) -> TourState {
        self.state
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    /// Resolver attempts used by the latest lookup of each step
    pub fn retry_counters(&self) -> &[u32] {
        &self.retry_counters
    }

    pub(super) fn set_state(&mut self, state: TourState) {
        if let Some(index) = state.step_index() {
            self.step_index = index;
        }
        self.state = state;
    }

    pub(super) fn record_attempts(&mut self, index: usize, attempts: u32) {
        if let Some(counter) = self.retry_counters.get_mut(index) {
            *counter = attempts;
        }
    }

    /// True the first time it is called in a session
    pub(super) fn claim_completion_write(&mut self) -> bool {
        !std::mem::replace(&mut self.completion_written, true)
    }
}

/// What the host needs to render the overlay and progress indicator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TourSnapshot {
    pub state: TourState,
    pub step_index: usize,
    pub total_steps: usize,
    pub step: Option<Step>,
    /// Resolved anchor of the active step
    pub target: Option<ElementHandle>,
    /// The active step's tooltip may be shown
    pub revealed: bool,
    pub notice: Option<Notice>,
}

impl TourSnapshot {
    /// 1-based position for "step 3 of 7" indicators
    pub fn progress(&self) -> Option<(usize, usize)> {
        self.state
            .step_index()
            .map(|index| (index + 1, self.total_steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_step_index() {
        assert_eq!(TourState::Active(2).step_index(), Some(2));
        assert_eq!(TourState::Paused(1).step_index(), Some(1));
        assert_eq!(TourState::Idle.step_index(), None);
        assert!(TourState::Skipped.is_terminal());
        assert!(!TourState::Paused(0).is_terminal());
    }

    #[test]
    fn test_session_tracks_step_index() {
        let mut session = TourSession::new(3);
        session.set_state(TourState::Active(2));
        session.set_state(TourState::Finished);

        assert_eq!(session.state(), TourState::Finished);
        assert_eq!(session.step_index(), 2);
    }

    #[test]
    fn test_completion_write_claimed_once() {
        let mut session = TourSession::new(1);
        assert!(session.claim_completion_write());
        assert!(!session.claim_completion_write());
    }

    #[test]
    fn test_record_attempts_ignores_out_of_range() {
        let mut session = TourSession::new(2);
        session.record_attempts(1, 3);
        session.record_attempts(5, 9);
        assert_eq!(session.retry_counters(), &[0, 3]);
    }

    #[test]
    fn test_state_serializes_tagged() {
        let json = serde_json::to_string(&TourState::Active(3)).unwrap();
        assert_eq!(json, r#"{"state":"active","index":3}"#);
        let json = serde_json::to_string(&TourState::Idle).unwrap();
        assert_eq!(json, r#"{"state":"idle"}"#);
    }
}
