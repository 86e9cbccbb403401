//! Push-based anchor registry.
//!
//! UI components register the elements tour steps attach to under a logical
//! key, update their geometry as layout settles, and unregister them when
//! they unmount. Every mutation is broadcast so waiting resolvers re-check.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::ui_state::{CallLog, PortCall};

/// Anchor key that is always registered by hosts (the page itself)
pub const BODY_ANCHOR: &str = "body";

/// Opaque reference to a registered element
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ElementHandle {
    id: u64,
    anchor: String,
}

impl ElementHandle {
    pub fn anchor(&self) -> &str {
        &self.anchor
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Rendered geometry of an element
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub width: f64,
    pub height: f64,
    /// False when hidden by layout (collapsed, `display: none`, ...)
    pub visible: bool,
}

impl Geometry {
    pub const HIDDEN: Geometry = Geometry {
        width: 0.0,
        height: 0.0,
        visible: false,
    };

    pub const fn sized(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            visible: true,
        }
    }

    /// Zero width or height is never ready, even when present and visible
    pub fn is_ready(&self) -> bool {
        self.visible && self.width > 0.0 && self.height > 0.0
    }
}

/// Structural change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomChange {
    Registered(String),
    Updated(String),
    Removed(String),
}

/// Element lookup, geometry and change notifications over the page
pub trait DomQuery: Send + Sync {
    fn query(&self, anchor: &str) -> Option<ElementHandle>;

    /// Geometry of a previously queried element; `None` once it is gone
    fn geometry(&self, element: &ElementHandle) -> Option<Geometry>;

    fn subscribe(&self) -> broadcast::Receiver<DomChange>;

    /// Center the element in its nearest scrollable ancestor
    fn scroll_into_view(&self, element: &ElementHandle);
}

struct Entry {
    handle: ElementHandle,
    geometry: Geometry,
}

/// In-process [`DomQuery`] fed by component registration
pub struct AnchorRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    changes: broadcast::Sender<DomChange>,
    last_scrolled: Mutex<Option<ElementHandle>>,
}

impl Default for AnchorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            changes,
            last_scrolled: Mutex::new(None),
        }
    }

    /// Registry that already holds the page body
    pub fn with_body() -> Self {
        let registry = Self::new();
        registry.register(BODY_ANCHOR, Geometry::sized(1280.0, 800.0));
        registry
    }

    /// Register (or re-mount) an element under `anchor`.
    ///
    /// Re-registering issues a fresh handle; handles from the previous mount
    /// stop resolving geometry.
    pub fn register(&self, anchor: &str, geometry: Geometry) -> ElementHandle {
        let handle = ElementHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            anchor: anchor.to_string(),
        };
        self.entries.lock().insert(
            anchor.to_string(),
            Entry {
                handle: handle.clone(),
                geometry,
            },
        );
        trace!(anchor, id = handle.id, "anchor registered");
        self.notify(DomChange::Registered(anchor.to_string()));
        handle
    }

    /// Update layout for a mounted element; false if nothing is registered
    pub fn update_geometry(&self, anchor: &str, geometry: Geometry) -> bool {
        let updated = match self.entries.lock().get_mut(anchor) {
            Some(entry) => {
                entry.geometry = geometry;
                true
            }
            None => false,
        };
        if updated {
            self.notify(DomChange::Updated(anchor.to_string()));
        }
        updated
    }

    pub fn unregister(&self, anchor: &str) -> bool {
        let removed = self.entries.lock().remove(anchor).is_some();
        if removed {
            trace!(anchor, "anchor unregistered");
            self.notify(DomChange::Removed(anchor.to_string()));
        }
        removed
    }

    pub fn contains(&self, anchor: &str) -> bool {
        self.entries.lock().contains_key(anchor)
    }

    /// Number of live change subscriptions
    pub fn listener_count(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn last_scrolled(&self) -> Option<ElementHandle> {
        self.last_scrolled.lock().clone()
    }

    fn notify(&self, change: DomChange) {
        // No receivers simply means nobody is waiting
        let _ = self.changes.send(change);
    }
}

impl DomQuery for AnchorRegistry {
    fn query(&self, anchor: &str) -> Option<ElementHandle> {
        self.entries.lock().get(anchor).map(|e| e.handle.clone())
    }

    fn geometry(&self, element: &ElementHandle) -> Option<Geometry> {
        self.entries
            .lock()
            .get(&element.anchor)
            .filter(|e| e.handle.id == element.id)
            .map(|e| e.geometry)
    }

    fn subscribe(&self) -> broadcast::Receiver<DomChange> {
        self.changes.subscribe()
    }

    fn scroll_into_view(&self, element: &ElementHandle) {
        trace!(anchor = %element.anchor, "scroll into view");
        *self.last_scrolled.lock() = Some(element.clone());
    }
}

/// Wraps a [`DomQuery`] and appends every lookup to a shared [`CallLog`]
pub struct RecordingDom {
    inner: Arc<dyn DomQuery>,
    log: CallLog,
}

impl RecordingDom {
    pub fn new(inner: Arc<dyn DomQuery>, log: CallLog) -> Self {
        Self { inner, log }
    }

    /// Anchors queried so far, in order
    pub fn queried(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter_map(|call| match call {
                PortCall::Query(anchor) => Some(anchor.clone()),
                _ => None,
            })
            .collect()
    }
}

impl DomQuery for RecordingDom {
    fn query(&self, anchor: &str) -> Option<ElementHandle> {
        self.log.lock().push(PortCall::Query(anchor.to_string()));
        self.inner.query(anchor)
    }

    fn geometry(&self, element: &ElementHandle) -> Option<Geometry> {
        self.inner.geometry(element)
    }

    fn subscribe(&self) -> broadcast::Receiver<DomChange> {
        self.inner.subscribe()
    }

    fn scroll_into_view(&self, element: &ElementHandle) {
        self.inner.scroll_into_view(element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_readiness() {
        assert!(Geometry::sized(10.0, 10.0).is_ready());
        assert!(!Geometry::sized(0.0, 10.0).is_ready());
        assert!(!Geometry::sized(10.0, 0.0).is_ready());
        assert!(!Geometry {
            width: 10.0,
            height: 10.0,
            visible: false
        }
        .is_ready());
        assert!(!Geometry::HIDDEN.is_ready());
    }

    #[test]
    fn test_register_and_query() {
        let registry = AnchorRegistry::new();
        assert!(registry.query("map-canvas").is_none());

        let handle = registry.register("map-canvas", Geometry::sized(800.0, 600.0));
        assert_eq!(registry.query("map-canvas"), Some(handle.clone()));
        assert_eq!(
            registry.geometry(&handle),
            Some(Geometry::sized(800.0, 600.0))
        );
    }

    #[test]
    fn test_reregister_invalidates_old_handle() {
        let registry = AnchorRegistry::new();
        let first = registry.register("ward-panel", Geometry::sized(300.0, 600.0));
        let second = registry.register("ward-panel", Geometry::sized(320.0, 600.0));

        assert_ne!(first, second);
        assert!(registry.geometry(&first).is_none());
        assert!(registry.geometry(&second).is_some());
    }

    #[test]
    fn test_update_and_unregister() {
        let registry = AnchorRegistry::new();
        assert!(!registry.update_geometry("filter-bar", Geometry::sized(1.0, 1.0)));

        let handle = registry.register("filter-bar", Geometry::HIDDEN);
        assert!(registry.update_geometry("filter-bar", Geometry::sized(600.0, 48.0)));
        assert!(registry.geometry(&handle).unwrap().is_ready());

        assert!(registry.unregister("filter-bar"));
        assert!(!registry.unregister("filter-bar"));
        assert!(registry.geometry(&handle).is_none());
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast() {
        let registry = AnchorRegistry::new();
        let mut rx = registry.subscribe();

        registry.register("score-chart", Geometry::HIDDEN);
        registry.update_geometry("score-chart", Geometry::sized(400.0, 200.0));
        registry.unregister("score-chart");

        assert_eq!(
            rx.recv().await.unwrap(),
            DomChange::Registered("score-chart".to_string())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            DomChange::Updated("score-chart".to_string())
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            DomChange::Removed("score-chart".to_string())
        );
    }

    #[test]
    fn test_with_body() {
        let registry = AnchorRegistry::with_body();
        assert!(registry.contains(BODY_ANCHOR));
    }

    #[test]
    fn test_recording_dom_logs_queries() {
        let registry: Arc<dyn DomQuery> = Arc::new(AnchorRegistry::with_body());
        let dom = RecordingDom::new(registry, CallLog::default());

        assert!(dom.query(BODY_ANCHOR).is_some());
        assert!(dom.query("missing").is_none());
        assert_eq!(dom.queried(), vec!["body".to_string(), "missing".to_string()]);
    }
}
