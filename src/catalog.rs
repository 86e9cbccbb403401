//! Static step catalogs for the dashboard tour.
//!
//! Both layouts are generated from the same [`StepId`] list through an
//! exhaustive match per layout, so a step cannot exist in one catalog and be
//! missing from the other, and the required UI state is shared.

use serde::{Deserialize, Serialize};

use crate::resolver::BODY_ANCHOR;
use crate::ui_state::UiState;

/// Panel sections, in tab order
pub const SECTION_SUMMARY: usize = 0;
pub const SECTION_SCORES: usize = 1;
pub const SECTION_LAND_COVER: usize = 2;

/// Viewport width below which the compact catalog is used
pub const DEFAULT_COMPACT_BREAKPOINT_PX: u32 = 768;

/// Logical step identifiers shared by every catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Welcome,
    Map,
    WardPanel,
    ScoreChart,
    LandCover,
    Filters,
    Done,
}

impl StepId {
    /// Tour order
    pub fn all() -> &'static [StepId] {
        &[
            StepId::Welcome,
            StepId::Map,
            StepId::WardPanel,
            StepId::ScoreChart,
            StepId::LandCover,
            StepId::Filters,
            StepId::Done,
        ]
    }

    /// UI state a step needs before its anchor can exist
    pub fn required_ui_state(&self) -> Option<UiState> {
        match self {
            StepId::Welcome | StepId::Done => None,
            StepId::Map | StepId::Filters => Some(UiState::BASELINE),
            StepId::WardPanel => Some(UiState::open(SECTION_SUMMARY)),
            StepId::ScoreChart => Some(UiState::open(SECTION_SCORES)),
            StepId::LandCover => Some(UiState::open(SECTION_LAND_COVER)),
        }
    }

    /// Whether moving to or away from this step animates the panel
    pub fn causes_transition(&self) -> bool {
        matches!(
            self,
            StepId::WardPanel | StepId::ScoreChart | StepId::LandCover | StepId::Filters
        )
    }

    fn content(&self) -> (&'static str, &'static str) {
        match self {
            StepId::Welcome => (
                "Welcome",
                "Take a quick tour of the ward dashboard. You can skip at any time.",
            ),
            StepId::Map => (
                "Ward map",
                "Each ward is shaded by its overall score. Click a ward to inspect it.",
            ),
            StepId::WardPanel => (
                "Ward details",
                "The side panel summarises the selected ward's population and indicators.",
            ),
            StepId::ScoreChart => (
                "Score breakdown",
                "See how each indicator contributes to the ward's score.",
            ),
            StepId::LandCover => (
                "Land cover",
                "Compare built-up, green and water coverage across years.",
            ),
            StepId::Filters => (
                "Filters",
                "Narrow the map by indicator, year or score range.",
            ),
            StepId::Done => (
                "You're all set",
                "Reopen this tour from the help menu whenever you need it.",
            ),
        }
    }
}

/// Where the tooltip sits relative to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

/// Device/viewport classification, decided once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    Compact,
    Expanded,
}

impl Layout {
    pub fn for_viewport(width_px: u32, compact_breakpoint_px: u32) -> Self {
        if width_px < compact_breakpoint_px {
            Layout::Compact
        } else {
            Layout::Expanded
        }
    }

    /// Anchor key and placement of a step in this layout
    fn anchor(self, id: StepId) -> (&'static str, Placement) {
        match (self, id) {
            (_, StepId::Welcome | StepId::Done) => (BODY_ANCHOR, Placement::Center),
            (Layout::Expanded, StepId::Map) => ("map-canvas", Placement::Right),
            (Layout::Compact, StepId::Map) => ("map-canvas", Placement::Bottom),
            (Layout::Expanded, StepId::WardPanel) => ("ward-panel", Placement::Left),
            (Layout::Compact, StepId::WardPanel) => ("ward-drawer", Placement::Top),
            (Layout::Expanded, StepId::ScoreChart) => ("score-chart", Placement::Left),
            (Layout::Compact, StepId::ScoreChart) => ("score-chart-compact", Placement::Top),
            (Layout::Expanded, StepId::LandCover) => ("landcover-tab", Placement::Left),
            (Layout::Compact, StepId::LandCover) => ("landcover-tab-compact", Placement::Top),
            (Layout::Expanded, StepId::Filters) => ("filter-bar", Placement::Bottom),
            (Layout::Compact, StepId::Filters) => ("filter-button", Placement::Bottom),
        }
    }
}

/// One entry in the tour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    /// Registry key of the element the tooltip attaches to
    pub anchor: String,
    pub title: String,
    pub content: String,
    pub placement: Placement,
    pub required_ui_state: Option<UiState>,
    pub causes_transition: bool,
}

impl Step {
    /// A bare step with no UI precondition, for custom catalogs
    pub fn new(id: StepId, anchor: impl Into<String>) -> Self {
        let (title, content) = id.content();
        Self {
            id,
            anchor: anchor.into(),
            title: title.to_string(),
            content: content.to_string(),
            placement: Placement::Bottom,
            required_ui_state: None,
            causes_transition: false,
        }
    }

    pub fn requires(mut self, state: UiState) -> Self {
        self.required_ui_state = Some(state);
        self
    }

    pub fn with_transition(mut self) -> Self {
        self.causes_transition = true;
        self
    }

    fn for_layout(layout: Layout, id: StepId) -> Self {
        let (anchor, placement) = layout.anchor(id);
        let (title, content) = id.content();
        Self {
            id,
            anchor: anchor.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            placement,
            required_ui_state: id.required_ui_state(),
            causes_transition: id.causes_transition(),
        }
    }
}

/// Ordered, immutable list of steps for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepCatalog {
    layout: Option<Layout>,
    steps: Vec<Step>,
}

impl StepCatalog {
    /// The built-in dashboard tour for `layout`
    pub fn for_layout(layout: Layout) -> Self {
        Self {
            layout: Some(layout),
            steps: StepId::all()
                .iter()
                .map(|id| Step::for_layout(layout, *id))
                .collect(),
        }
    }

    pub fn for_viewport(width_px: u32, compact_breakpoint_px: u32) -> Self {
        Self::for_layout(Layout::for_viewport(width_px, compact_breakpoint_px))
    }

    /// A custom catalog for embedders; `None` if `steps` is empty
    pub fn from_steps(steps: Vec<Step>) -> Option<Self> {
        if steps.is_empty() {
            return None;
        }
        Some(Self {
            layout: None,
            steps,
        })
    }

    pub fn layout(&self) -> Option<Layout> {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn position(&self, id: StepId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}
