//! Readiness gate: may the tour start?
//!
//! Start requires the completion record to say "not completed" and the
//! dashboard's primary dataset to have loaded. Storage failures read as
//! "completed" so a broken store never forces the tour on anyone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::TourError;
use crate::store::CompletionStore;

/// Create a connected notifier/signal pair, initially not ready
pub fn data_ready_channel() -> (DataReadyNotifier, DataReadySignal) {
    let (tx, rx) = watch::channel(false);
    (DataReadyNotifier(tx), DataReadySignal(rx))
}

/// Host side of the data-readiness signal
#[derive(Debug)]
pub struct DataReadyNotifier(watch::Sender<bool>);

impl DataReadyNotifier {
    pub fn mark_ready(&self) {
        self.0.send_replace(true);
    }

    /// Data is being reloaded
    pub fn mark_loading(&self) {
        self.0.send_replace(false);
    }

    pub fn signal(&self) -> DataReadySignal {
        DataReadySignal(self.0.subscribe())
    }
}

/// Tour side of the data-readiness signal
#[derive(Debug, Clone)]
pub struct DataReadySignal(watch::Receiver<bool>);

impl DataReadySignal {
    /// A signal that is already ready (for hosts without a loading phase)
    pub fn ready() -> Self {
        let (_, rx) = watch::channel(true);
        Self(rx)
    }

    pub fn is_ready(&self) -> bool {
        *self.0.borrow()
    }

    /// Wait until ready. Returns false if the notifier went away first.
    pub async fn wait(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        let mut rx = self.0.clone();
        let ready = rx.wait_for(|ready| *ready).await.is_ok();
        ready
    }
}

#[derive(Clone)]
pub struct ReadinessGate {
    store: Arc<dyn CompletionStore>,
    data: DataReadySignal,
}

impl ReadinessGate {
    pub fn new(store: Arc<dyn CompletionStore>, data: DataReadySignal) -> Self {
        Self { store, data }
    }

    /// Completion flag; unreadable storage counts as completed
    pub fn is_completed(&self) -> bool {
        match self.store.is_completed() {
            Ok(completed) => completed,
            Err(e) => {
                let error = TourError::persistence(format!("{e:#}"));
                warn!(%error, "completion record unreadable, treating tour as completed");
                true
            }
        }
    }

    pub fn data_ready(&self) -> bool {
        self.data.is_ready()
    }

    pub fn should_start(&self) -> bool {
        !self.is_completed() && self.data_ready()
    }

    /// Wait for the data signal, giving up after `bound` if one is set
    pub async fn wait_for_data(&self, bound: Option<Duration>) -> Result<(), TourError> {
        let ready = async {
            if !self.data.wait().await {
                // Nobody can mark the data ready any more
                debug!("data readiness notifier dropped");
                std::future::pending::<()>().await;
            }
        };

        match bound {
            Some(limit) => tokio::time::timeout(limit, ready)
                .await
                .map_err(|_| TourError::DataReadinessTimeout { waited: limit }),
            None => {
                ready.await;
                Ok(())
            }
        }
    }

    /// Persist completion. Failures are logged and swallowed; returns
    /// whether the write succeeded.
    pub fn record_completion(&self) -> bool {
        match self.store.mark_completed() {
            Ok(()) => true,
            Err(e) => {
                let error = TourError::persistence(format!("{e:#}"));
                warn!(%error, "failed to persist tour completion");
                false
            }
        }
    }
}
