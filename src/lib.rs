//! ward-tour - guided walkthrough orchestration for the ward statistics dashboard
//!
//! The [`TourController`] sequences a static [`StepCatalog`], applying each
//! step's panel/section state, waiting for animations, and confirming anchors
//! through the [`TargetResolver`] before a step is revealed. Hosts drive it
//! through a [`TourHandle`] and plug in their own UI, DOM and storage ports.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod logging;
pub mod race;
pub mod resolver;
pub mod sim;
pub mod store;
pub mod ui_state;

pub use catalog::{Layout, Placement, Step, StepCatalog, StepId};
pub use controller::{
    Direction, Notice, TourController, TourHandle, TourPorts, TourSettings, TourSnapshot,
    TourState,
};
pub use error::TourError;
pub use gate::{data_ready_channel, DataReadyNotifier, DataReadySignal, ReadinessGate};
pub use resolver::{
    AnchorRegistry, DomQuery, ElementHandle, Geometry, TargetResolver, WaitRequest, WaitResult,
};
pub use store::{CompletionStore, FileCompletionStore, MemoryCompletionStore};
pub use ui_state::{TransitionKind, UiState, UiStateController};
