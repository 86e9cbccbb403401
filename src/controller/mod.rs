//! Tour controller: the state machine that sequences the walkthrough.
//!
//! The controller runs as a single task consuming [`TourEvent`]s from its
//! [`TourHandle`]s. At most one piece of pending work (data wait, paused
//! transition race, or anchor lookup) exists at a time; replacing or
//! clearing it cancels whatever the previous step left running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::catalog::{Step, StepCatalog};
use crate::config::TourConfig;
use crate::error::TourError;
use crate::gate::{DataReadySignal, ReadinessGate};
use crate::race::{first_of, Race, ScopedTask};
use crate::resolver::{DomQuery, ElementHandle, PendingWait, TargetResolver, WaitRequest};
use crate::store::CompletionStore;
use crate::ui_state::{TransitionKind, UiState, UiStateController};

pub mod events;
pub mod session;

pub use events::{Direction, Settle, TourEvent};
pub use session::{Notice, TourSession, TourSnapshot, TourState};


/// Timing and behaviour knobs for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TourSettings {
    /// Pause between data readiness and the first lookup
    pub settle_delay: Duration,
    pub resolve_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Expected transition duration; progress is forced after this long
    pub transition_fallback: Duration,
    /// Upper bound on the data wait; `None` waits forever
    pub data_ready_timeout: Option<Duration>,
    /// Confirm each anchor with the resolver before revealing its step
    pub verify_anchors: bool,
    pub scroll_into_view: bool,
}

impl Default for TourSettings {
    fn default() -> Self {
        Self::from_config(&TourConfig::default())
    }
}

impl TourSettings {
    pub fn from_config(config: &TourConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            resolve_timeout: Duration::from_millis(config.resolve_timeout_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            transition_fallback: Duration::from_millis(config.transition_fallback_ms),
            data_ready_timeout: (config.data_ready_timeout_ms > 0)
                .then(|| Duration::from_millis(config.data_ready_timeout_ms)),
            verify_anchors: config.verify_anchors,
            scroll_into_view: config.scroll_into_view,
        }
    }
}

/// External collaborators the controller drives
#[derive(Clone)]
pub struct TourPorts {
    pub ui: Arc<dyn UiStateController>,
    pub dom: Arc<dyn DomQuery>,
    pub store: Arc<dyn CompletionStore>,
    pub data: DataReadySignal,
}

/// Callback invoked on every state change
pub type StateListener = Box<dyn Fn(&TourSnapshot) + Send>;

enum Command {
    Event(TourEvent),
    Listen(StateListener),
    Shutdown,
}

/// The single piece of outstanding work
enum Pending {
    Task {
        task: ScopedTask<TourEvent>,
        /// Delivered if the task dies without producing an event
        fallback: TourEvent,
    },
    Anchor {
        index: usize,
        wait: PendingWait,
    },
}

impl Pending {
    async fn join(&mut self) -> TourEvent {
        match self {
            Pending::Task { task, fallback } => match task.join().await {
                Some(event) => event,
                None => fallback.clone(),
            },
            Pending::Anchor { index, wait } => {
                let index = *index;
                match wait.join().await {
                    Some(result) => TourEvent::AnchorResolved { index, result },
                    None => TourEvent::TargetNotFound { index },
                }
            }
        }
    }
}

async fn next_outcome(pending: &mut Option<Pending>) -> TourEvent {
    let event = match pending {
        Some(work) => work.join().await,
        None => std::future::pending().await,
    };
    *pending = None;
    event
}

/// Wait for a transition-finished notification of `kind`
async fn transition_finished(rx: &mut broadcast::Receiver<TransitionKind>, kind: TransitionKind) {
    loop {
        match rx.recv().await {
            Ok(finished) if finished == kind => return,
            Ok(_) => continue,
            // Missed notifications may have included ours
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            // No more notifications; leave it to the fallback timer
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

pub struct TourController {
    settings: TourSettings,
    catalog: Arc<StepCatalog>,
    gate: ReadinessGate,
    ui: Arc<dyn UiStateController>,
    resolver: TargetResolver,
    session: TourSession,
    /// Last UI state this controller applied
    ui_state: UiState,
    target: Option<ElementHandle>,
    revealed: bool,
    notice: Option<Notice>,
    pending: Option<Pending>,
    listeners: Vec<StateListener>,
    snapshots: watch::Sender<TourSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl TourController {
    /// Build a controller and the handle that drives it. Call
    /// [`run`](Self::run) (or use [`spawn`](Self::spawn)) to start it.
    pub fn new(settings: TourSettings, catalog: StepCatalog, ports: TourPorts) -> (Self, TourHandle) {
        let catalog = Arc::new(catalog);
        let session = TourSession::new(catalog.len());
        let resolver = TargetResolver::new(ports.dom)
            .with_retry_delay(settings.retry_delay)
            .with_scroll_into_view(settings.scroll_into_view);
        let (commands_tx, commands) = mpsc::unbounded_channel();

        let controller = Self {
            settings,
            catalog,
            gate: ReadinessGate::new(ports.store, ports.data),
            ui: ports.ui,
            resolver,
            session,
            ui_state: UiState::BASELINE,
            target: None,
            revealed: false,
            notice: None,
            pending: None,
            listeners: Vec::new(),
            snapshots: watch::channel(TourSnapshot {
                state: TourState::Idle,
                step_index: 0,
                total_steps: 0,
                step: None,
                target: None,
                revealed: false,
                notice: None,
            })
            .0,
            commands,
        };
        controller.snapshots.send_replace(controller.snapshot());

        let handle = TourHandle {
            commands: commands_tx,
            snapshots: controller.snapshots.subscribe(),
        };
        (controller, handle)
    }

    /// Build a controller and run it on the current runtime
    pub fn spawn(settings: TourSettings, catalog: StepCatalog, ports: TourPorts) -> TourHandle {
        let (controller, handle) = Self::new(settings, catalog, ports);
        tokio::spawn(controller.run());
        handle
    }

    pub async fn run(mut self) {
        debug!(steps = self.catalog.len(), "tour controller running");
        loop {
            let event = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Event(event)) => event,
                    Some(Command::Listen(listener)) => {
                        listener(&self.snapshot());
                        self.listeners.push(listener);
                        continue;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                event = next_outcome(&mut self.pending) => event,
            };
            self.handle(event);
        }
        self.pending = None;
        debug!("tour controller stopped");
    }

    /// The transition function
    pub fn handle(&mut self, event: TourEvent) {
        match (self.session.state(), event) {
            (_, TourEvent::RestartSession) => self.restart(),

            (TourState::Idle, TourEvent::Start) => self.begin(),

            (TourState::Preparing, TourEvent::DataReady) => {
                self.apply_ui_state(0);
                self.activate(0);
            }
            (TourState::Preparing, TourEvent::DataUnavailable(error)) => {
                warn!(%error, "dashboard data never became ready, tour not started");
                self.session.set_state(TourState::Idle);
                self.notice = Some(Notice::DataUnavailable);
                self.publish();
            }

            (TourState::Active(i), TourEvent::Advance { direction, closing }) => {
                self.advance(i, direction, closing);
            }
            (TourState::Active(i), TourEvent::AnchorResolved { index, result }) if index == i => {
                self.session.record_attempts(i, result.attempt_count);
                if result.success {
                    self.target = result.element;
                    self.revealed = true;
                    debug!(index = i, attempts = result.attempt_count, "step revealed");
                    self.publish();
                } else if result.error.as_ref().is_some_and(TourError::is_cancelled) {
                    debug!(index = i, "anchor lookup cancelled");
                } else {
                    self.handle(TourEvent::TargetNotFound { index: i });
                }
            }
            (TourState::Active(i), TourEvent::TargetNotFound { index }) if index == i => {
                let step = self.step(i);
                let id = step.id;
                warn!(index = i, step = ?id, anchor = %step.anchor, "TargetNotFound, skipping step");
                self.notice = Some(Notice::StepSkipped(id));
                self.advance(i, Direction::Next, false);
            }

            (TourState::Paused(i), TourEvent::TransitionSettled { from, to, kind, settle })
                if from == i =>
            {
                if settle == Settle::Fallback {
                    let error = TourError::TransitionTimeout {
                        kind,
                        waited: self.settings.transition_fallback,
                    };
                    warn!(%error, "continuing on fallback timer");
                }
                self.activate(to);
            }

            (TourState::Active(_) | TourState::Paused(_), TourEvent::Finish) => {
                self.conclude(TourState::Finished);
            }
            (TourState::Active(_) | TourState::Paused(_), TourEvent::Skip) => {
                self.conclude(TourState::Skipped);
            }

            (state, event) => debug!(?state, ?event, "event ignored"),
        }
    }

    pub fn session(&self) -> &TourSession {
        &self.session
    }

    pub fn snapshot(&self) -> TourSnapshot {
        let state = self.session.state();
        TourSnapshot {
            state,
            step_index: self.session.step_index(),
            total_steps: self.catalog.len(),
            step: state
                .step_index()
                .and_then(|i| self.catalog.get(i))
                .cloned(),
            target: self.target.clone(),
            revealed: self.revealed,
            notice: self.notice,
        }
    }

    fn step(&self, index: usize) -> &Step {
        &self.catalog.steps()[index]
    }

    fn begin(&mut self) {
        if self.gate.is_completed() {
            info!("tour already completed, not starting");
            return;
        }

        self.session.set_state(TourState::Preparing);
        self.notice = None;
        self.publish();

        let gate = self.gate.clone();
        let bound = self.settings.data_ready_timeout;
        let settle = self.settings.settle_delay;
        let task = ScopedTask::spawn(move |_| async move {
            match gate.wait_for_data(bound).await {
                Ok(()) => {
                    tokio::time::sleep(settle).await;
                    TourEvent::DataReady
                }
                Err(error) => TourEvent::DataUnavailable(error),
            }
        });
        self.pending = Some(Pending::Task {
            task,
            fallback: TourEvent::DataUnavailable(TourError::Cancelled),
        });
    }

    fn advance(&mut self, from: usize, direction: Direction, closing: bool) {
        let to = match direction {
            Direction::Next => from + 1,
            Direction::Back => match from.checked_sub(1) {
                Some(to) => to,
                None => {
                    debug!("already at the first step");
                    return;
                }
            },
        };
        self.pending = None;

        if to >= self.catalog.len() {
            self.conclude(TourState::Finished);
            return;
        }

        // Subscribe before touching the UI so an immediate notification is kept
        let transitions = self.ui.transitions();
        let change = self.apply_ui_state(to);
        let animated = self.step(from).causes_transition || self.step(to).causes_transition;

        match change {
            Some(kind) if animated && !closing => self.pause(from, to, kind, transitions),
            _ => self.activate(to),
        }
    }

    /// Apply the step's required UI state; returns the transition it starts
    fn apply_ui_state(&mut self, index: usize) -> Option<TransitionKind> {
        let required = self.step(index).required_ui_state?;
        let change = self.ui_state.transition_to(&required);

        self.ui.set_panel_open(required.panel_open);
        self.ui.set_active_section(required.active_section);
        self.ui_state = required;
        change
    }

    fn pause(
        &mut self,
        from: usize,
        to: usize,
        kind: TransitionKind,
        mut transitions: broadcast::Receiver<TransitionKind>,
    ) {
        self.session.set_state(TourState::Paused(from));
        self.target = None;
        self.revealed = false;
        debug!(from, to, %kind, "waiting for transition");
        self.publish();

        let fallback = self.settings.transition_fallback;
        let task = ScopedTask::spawn(move |token| async move {
            let outcome = first_of(
                &token,
                move |_| async move { transition_finished(&mut transitions, kind).await },
                move |_| tokio::time::sleep(fallback),
            )
            .await;
            let settle = match outcome {
                Race::First(()) => Settle::Notified,
                Race::Second(()) | Race::Cancelled => Settle::Fallback,
            };
            TourEvent::TransitionSettled {
                from,
                to,
                kind,
                settle,
            }
        });
        self.pending = Some(Pending::Task {
            task,
            fallback: TourEvent::TransitionSettled {
                from,
                to,
                kind,
                settle: Settle::Fallback,
            },
        });
    }

    fn activate(&mut self, index: usize) {
        self.session.set_state(TourState::Active(index));
        self.target = None;
        self.revealed = false;

        let step = self.step(index);
        info!(index, step = ?step.id, anchor = %step.anchor, "showing step");

        if self.settings.verify_anchors {
            let request = WaitRequest::new(step.anchor.clone(), self.settings.resolve_timeout)
                .with_retries(self.settings.max_retries);
            self.pending = Some(Pending::Anchor {
                index,
                wait: self.resolver.spawn(request),
            });
        } else {
            self.revealed = true;
        }
        self.publish();
    }

    fn conclude(&mut self, terminal: TourState) {
        self.pending = None;

        if self.session.claim_completion_write() {
            self.gate.record_completion();
        }

        self.reset_ui();

        self.session.set_state(terminal);
        self.target = None;
        self.revealed = false;
        info!(state = ?terminal, last_step = self.session.step_index(), "tour ended");
        self.publish();
    }

    fn restart(&mut self) {
        self.pending = None;
        self.session = TourSession::new(self.catalog.len());
        self.reset_ui();
        self.target = None;
        self.revealed = false;
        self.notice = None;
        debug!("tour session reset");
        self.publish();
    }

    /// Put the panel back where the tour found it
    fn reset_ui(&mut self) {
        self.ui.set_panel_open(UiState::BASELINE.panel_open);
        self.ui.set_active_section(UiState::BASELINE.active_section);
        self.ui_state = UiState::BASELINE;
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        for listener in &self.listeners {
            listener(&snapshot);
        }
        self.snapshots.send_replace(snapshot);
    }
}

/// Cloneable handle used by the dashboard to drive the tour.
///
/// All methods are fire-and-forget; once the controller has stopped they
/// do nothing.
#[derive(Clone)]
pub struct TourHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<TourSnapshot>,
}

impl TourHandle {
    pub fn start(&self) {
        self.send(TourEvent::Start);
    }

    pub fn advance(&self, direction: Direction) {
        self.send(TourEvent::Advance {
            direction,
            closing: false,
        });
    }

    pub fn next(&self) {
        self.advance(Direction::Next);
    }

    pub fn back(&self) {
        self.advance(Direction::Back);
    }

    /// Tooltip dismissed: move on without waiting for animations
    pub fn close(&self) {
        self.send(TourEvent::close());
    }

    pub fn finish(&self) {
        self.send(TourEvent::Finish);
    }

    pub fn skip(&self) {
        self.send(TourEvent::Skip);
    }

    /// Report that the overlay could not attach to step `index`
    pub fn target_not_found(&self, index: usize) {
        self.send(TourEvent::TargetNotFound { index });
    }

    pub fn restart_session(&self) {
        self.send(TourEvent::RestartSession);
    }

    /// Register a callback; it is called with the current snapshot right
    /// away and again on every change
    pub fn on_state_change<F>(&self, callback: F)
    where
        F: Fn(&TourSnapshot) + Send + 'static,
    {
        if self.commands.send(Command::Listen(Box::new(callback))).is_err() {
            debug!("tour controller stopped, listener dropped");
        }
    }

    pub fn snapshot(&self) -> TourSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TourSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`. Intermediate
    /// snapshots may be coalesced; use [`on_state_change`](Self::on_state_change)
    /// to observe every one. Returns `None` if the controller stops first.
    pub async fn wait_for<F>(&self, predicate: F) -> Option<TourSnapshot>
    where
        F: FnMut(&TourSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let snapshot = rx.wait_for(predicate).await.ok()?.clone();
        Some(snapshot)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, event: TourEvent) {
        if self.commands.send(Command::Event(event)).is_err() {
            debug!("tour controller stopped, event dropped");
        }
    }
}
