//! Error taxonomy for the tour engine.
//!
//! None of these escape the controller: each one is logged and converted
//! into forward progress or a clean end of the session.

use std::time::Duration;

use thiserror::Error;

use crate::ui_state::TransitionKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TourError {
    /// The anchor never became ready within the timeout and retries
    #[error("anchor '{anchor}' not ready after {attempts} attempt(s) ({elapsed:?})")]
    TargetNotFound {
        anchor: String,
        attempts: u32,
        elapsed: Duration,
    },

    /// The UI never reported the end of an animated transition
    #[error("{kind} transition did not report completion within {waited:?}")]
    TransitionTimeout {
        kind: TransitionKind,
        waited: Duration,
    },

    /// The completion store could not be read or written
    #[error("completion store error: {0}")]
    Persistence(String),

    /// The dashboard data never finished loading
    #[error("dashboard data not ready after {waited:?}")]
    DataReadinessTimeout { waited: Duration },

    /// The wait was cancelled by the caller
    #[error("wait cancelled")]
    Cancelled,
}

impl TourError {
    /// Wrap any storage failure as a persistence error
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        TourError::Persistence(err.to_string())
    }

    /// Whether this error came from caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TourError::Cancelled)
    }
}
