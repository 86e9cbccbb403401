//! UI-state port: the panel/section state the tour drives, and the
//! transition-finished notifications the dashboard emits for it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The single "panel open / active section" state a step may require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiState {
    pub panel_open: bool,
    pub active_section: usize,
}

impl UiState {
    /// Closed/neutral state the tour leaves behind when it ends
    pub const BASELINE: UiState = UiState {
        panel_open: false,
        active_section: 0,
    };

    pub const fn open(section: usize) -> Self {
        Self {
            panel_open: true,
            active_section: section,
        }
    }

    /// Which animation (if any) moving from `self` to `next` will trigger.
    ///
    /// A change of panel visibility wins over a section change because the
    /// section switch happens inside the sliding panel.
    pub fn transition_to(&self, next: &UiState) -> Option<TransitionKind> {
        if self.panel_open != next.panel_open {
            Some(TransitionKind::Panel)
        } else if self.active_section != next.active_section {
            Some(TransitionKind::Section)
        } else {
            None
        }
    }
}

impl Default for UiState {
    fn default() -> Self {
        Self::BASELINE
    }
}

/// Animated transitions the dashboard reports completion for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Side panel sliding open or closed
    Panel,
    /// Tab/section switch inside the panel
    Section,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Panel => write!(f, "panel"),
            TransitionKind::Section => write!(f, "section"),
        }
    }
}

/// Side-effecting calls used by step preconditions.
///
/// Implementations must not block; animations run elsewhere and report back
/// through the [`transitions`](UiStateController::transitions) channel.
pub trait UiStateController: Send + Sync {
    fn set_panel_open(&self, open: bool);

    fn set_active_section(&self, index: usize);

    /// Subscribe to "transition finished" notifications
    fn transitions(&self) -> broadcast::Receiver<TransitionKind>;
}

/// A call observed on one of the instrumented ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortCall {
    SetPanelOpen(bool),
    SetActiveSection(usize),
    Query(String),
}

/// Call log shared between instrumented ports so ordering can be asserted
pub type CallLog = Arc<Mutex<Vec<PortCall>>>;

/// Mock implementation for testing
///
/// Records every call and only reports transitions when told to.
#[derive(Clone)]
pub struct MockUi {
    state: Arc<Mutex<UiState>>,
    log: CallLog,
    transitions: broadcast::Sender<TransitionKind>,
}

impl MockUi {
    pub fn new() -> Self {
        Self::with_log(CallLog::default())
    }

    pub fn with_log(log: CallLog) -> Self {
        let (transitions, _) = broadcast::channel(16);
        Self {
            state: Arc::new(Mutex::new(UiState::BASELINE)),
            log,
            transitions,
        }
    }

    /// Report the end of an animation
    pub fn finish_transition(&self, kind: TransitionKind) {
        let _ = self.transitions.send(kind);
    }

    pub fn state(&self) -> UiState {
        *self.state.lock()
    }

    pub fn calls(&self) -> Vec<PortCall> {
        self.log.lock().clone()
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Default for MockUi {
    fn default() -> Self {
        Self::new()
    }
}

impl UiStateController for MockUi {
    fn set_panel_open(&self, open: bool) {
        self.state.lock().panel_open = open;
        self.log.lock().push(PortCall::SetPanelOpen(open));
    }

    fn set_active_section(&self, index: usize) {
        self.state.lock().active_section = index;
        self.log.lock().push(PortCall::SetActiveSection(index));
    }

    fn transitions(&self) -> broadcast::Receiver<TransitionKind> {
        self.transitions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_to_panel_change_wins() {
        let closed = UiState::BASELINE;
        assert_eq!(
            closed.transition_to(&UiState::open(2)),
            Some(TransitionKind::Panel)
        );
        assert_eq!(
            UiState::open(2).transition_to(&closed),
            Some(TransitionKind::Panel)
        );
    }

    #[test]
    fn test_transition_to_section_change() {
        assert_eq!(
            UiState::open(0).transition_to(&UiState::open(1)),
            Some(TransitionKind::Section)
        );
    }

    #[test]
    fn test_transition_to_same_state() {
        assert_eq!(UiState::open(1).transition_to(&UiState::open(1)), None);
    }

    #[test]
    fn test_mock_ui_records_calls() {
        let ui = MockUi::new();
        ui.set_panel_open(true);
        ui.set_active_section(3);

        assert_eq!(ui.state(), UiState::open(3));
        assert_eq!(
            ui.calls(),
            vec![PortCall::SetPanelOpen(true), PortCall::SetActiveSection(3)]
        );
    }

    #[tokio::test]
    async fn test_mock_ui_transition_delivery() {
        let ui = MockUi::new();
        let mut rx = ui.transitions();
        ui.finish_transition(TransitionKind::Section);
        assert_eq!(rx.recv().await.unwrap(), TransitionKind::Section);
    }
}
