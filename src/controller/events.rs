//! Events consumed by the tour state machine

use serde::{Deserialize, Serialize};

use crate::error::TourError;
use crate::resolver::WaitResult;
use crate::ui_state::TransitionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Next,
    Back,
}

/// How a paused transition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// The UI reported the transition finished
    Notified,
    /// The fallback timer fired first
    Fallback,
}

/// Everything that can happen to a tour session.
///
/// The first group comes from the host through [`TourHandle`]; the second
/// is produced by the controller's own pending work.
///
/// [`TourHandle`]: super::TourHandle
#[derive(Debug, Clone, PartialEq)]
pub enum TourEvent {
    Start,
    /// Move one step; `closing` is set when the user dismissed the tooltip,
    /// which moves on without waiting for the panel animation
    Advance {
        direction: Direction,
        closing: bool,
    },
    Finish,
    Skip,
    /// The anchor for step `index` could not be found
    TargetNotFound {
        index: usize,
    },
    /// New page load
    RestartSession,

    DataReady,
    DataUnavailable(TourError),
    TransitionSettled {
        from: usize,
        to: usize,
        kind: TransitionKind,
        settle: Settle,
    },
    AnchorResolved {
        index: usize,
        result: WaitResult,
    },
}

impl TourEvent {
    pub fn next() -> Self {
        TourEvent::Advance {
            direction: Direction::Next,
            closing: false,
        }
    }

    pub fn back() -> Self {
        TourEvent::Advance {
            direction: Direction::Back,
            closing: false,
        }
    }

    pub fn close() -> Self {
        TourEvent::Advance {
            direction: Direction::Next,
            closing: true,
        }
    }
}
