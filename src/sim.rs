//! In-process stand-in for the ward dashboard.
//!
//! Mounts catalog anchors into an [`AnchorRegistry`] the way the real page
//! would: map and filter anchors are always present, panel anchors appear
//! only once the slide/tab animation has finished, and transition-finished
//! notifications are broadcast at the end of every animation. Anchors named
//! in `missing` are never mounted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::catalog::StepCatalog;
use crate::gate::DataReadyNotifier;
use crate::resolver::{AnchorRegistry, Geometry};
use crate::ui_state::{TransitionKind, UiState, UiStateController};

/// How long the simulated animations and data load take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTiming {
    pub panel: Duration,
    pub section: Duration,
    pub data_load: Duration,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            panel: Duration::from_millis(280),
            section: Duration::from_millis(180),
            data_load: Duration::from_millis(600),
        }
    }
}

struct Inner {
    registry: Arc<AnchorRegistry>,
    /// Anchors rendered inside the panel, by section
    panel_anchors: BTreeMap<usize, Vec<String>>,
    missing: HashSet<String>,
    state: Mutex<UiState>,
    transitions: broadcast::Sender<TransitionKind>,
    timing: SimTiming,
}

impl Inner {
    fn mount(&self, anchor: &str) {
        if !self.missing.contains(anchor) && !self.registry.contains(anchor) {
            self.registry.register(anchor, Geometry::sized(360.0, 480.0));
        }
    }

    fn mount_section(&self, section: usize) {
        for anchor in self.panel_anchors.get(&section).into_iter().flatten() {
            self.mount(anchor);
        }
    }

    fn unmount_section(&self, section: usize) {
        for anchor in self.panel_anchors.get(&section).into_iter().flatten() {
            self.registry.unregister(anchor);
        }
    }

    /// Finish an animation: mount whatever is visible now and report it
    fn settle(&self, kind: TransitionKind) {
        let state = *self.state.lock();
        if state.panel_open {
            self.mount_section(state.active_section);
        }
        debug!(%kind, "simulated transition finished");
        let _ = self.transitions.send(kind);
    }
}

/// Simulated dashboard; must be driven from within a tokio runtime
#[derive(Clone)]
pub struct SimulatedDashboard {
    inner: Arc<Inner>,
}

impl SimulatedDashboard {
    pub fn new(
        registry: Arc<AnchorRegistry>,
        catalog: &StepCatalog,
        missing: impl IntoIterator<Item = String>,
        timing: SimTiming,
    ) -> Self {
        let missing: HashSet<String> = missing.into_iter().collect();
        let mut panel_anchors: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut static_anchors = Vec::new();

        for step in catalog.steps() {
            match step.required_ui_state {
                Some(state) if state.panel_open => panel_anchors
                    .entry(state.active_section)
                    .or_default()
                    .push(step.anchor.clone()),
                _ => static_anchors.push(step.anchor.clone()),
            }
        }

        let (transitions, _) = broadcast::channel(16);
        let inner = Inner {
            registry,
            panel_anchors,
            missing,
            state: Mutex::new(UiState::BASELINE),
            transitions,
            timing,
        };
        for anchor in &static_anchors {
            inner.mount(anchor);
        }

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn state(&self) -> UiState {
        *self.inner.state.lock()
    }

    pub fn registry(&self) -> &Arc<AnchorRegistry> {
        &self.inner.registry
    }

    /// Mark the primary dataset loaded after the simulated fetch
    pub fn load_data(&self, notifier: DataReadyNotifier) {
        let delay = self.inner.timing.data_load;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("simulated dataset loaded");
            notifier.mark_ready();
            // The signal reads "gone" once the notifier drops
            std::future::pending::<()>().await;
        });
    }

    fn animate(&self, kind: TransitionKind, duration: Duration) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            inner.settle(kind);
        });
    }
}

impl UiStateController for SimulatedDashboard {
    fn set_panel_open(&self, open: bool) {
        let section = {
            let mut state = self.inner.state.lock();
            if state.panel_open == open {
                return;
            }
            state.panel_open = open;
            state.active_section
        };

        if !open {
            self.inner.unmount_section(section);
        }
        self.animate(TransitionKind::Panel, self.inner.timing.panel);
    }

    fn set_active_section(&self, index: usize) {
        let (previous, panel_open) = {
            let mut state = self.inner.state.lock();
            if state.active_section == index {
                return;
            }
            let previous = std::mem::replace(&mut state.active_section, index);
            (previous, state.panel_open)
        };

        // Tabs of a closed panel switch without animating
        if panel_open {
            self.inner.unmount_section(previous);
            self.animate(TransitionKind::Section, self.inner.timing.section);
        }
    }

    fn transitions(&self) -> broadcast::Receiver<TransitionKind> {
        self.inner.transitions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Layout;
    use crate::gate::data_ready_channel;
    use tokio::time::sleep;

    fn dashboard(missing: &[&str]) -> SimulatedDashboard {
        let registry = Arc::new(AnchorRegistry::with_body());
        let catalog = StepCatalog::for_layout(Layout::Expanded);
        SimulatedDashboard::new(
            registry,
            &catalog,
            missing.iter().map(|s| s.to_string()),
            SimTiming::default(),
        )
    }

    #[test]
    fn test_static_anchors_mounted_up_front() {
        let sim = dashboard(&["filter-bar"]);
        assert!(sim.registry().contains("map-canvas"));
        assert!(!sim.registry().contains("filter-bar"));
        assert!(!sim.registry().contains("ward-panel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panel_anchor_appears_after_animation() {
        let sim = dashboard(&[]);
        let mut transitions = sim.transitions();

        sim.set_panel_open(true);
        sleep(Duration::from_millis(100)).await;
        assert!(!sim.registry().contains("ward-panel"));

        assert_eq!(transitions.recv().await.unwrap(), TransitionKind::Panel);
        assert!(sim.registry().contains("ward-panel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_section_switch_swaps_anchors() {
        let sim = dashboard(&[]);
        let mut transitions = sim.transitions();
        sim.set_panel_open(true);
        transitions.recv().await.unwrap();

        sim.set_active_section(crate::catalog::SECTION_SCORES);
        assert!(!sim.registry().contains("ward-panel"));
        assert_eq!(transitions.recv().await.unwrap(), TransitionKind::Section);
        assert!(sim.registry().contains("score-chart"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_panel_unmounts_immediately() {
        let sim = dashboard(&[]);
        let mut transitions = sim.transitions();
        sim.set_panel_open(true);
        transitions.recv().await.unwrap();

        sim.set_panel_open(false);
        assert!(!sim.registry().contains("ward-panel"));
        assert_eq!(transitions.recv().await.unwrap(), TransitionKind::Panel);
        assert_eq!(sim.state(), UiState::BASELINE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_panel_anchor_never_mounts() {
        let sim = dashboard(&["ward-panel"]);
        let mut transitions = sim.transitions();
        sim.set_panel_open(true);
        transitions.recv().await.unwrap();
        assert!(!sim.registry().contains("ward-panel"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_data_marks_ready() {
        let sim = dashboard(&[]);
        let (notifier, signal) = data_ready_channel();
        sim.load_data(notifier);

        assert!(!signal.is_ready());
        assert!(signal.wait().await);
    }
}
