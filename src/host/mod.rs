//! Host environment abstraction.
//!
//! The idle detector and interaction tracker never touch a concrete page
//! directly; they talk to a [`Host`], which supplies element inspection,
//! event dispatch, visibility state, intersection/mutation observation, and
//! timer scheduling. In production the host wraps whatever environment embeds
//! the library; [`sim::SimHost`] is an in-memory implementation used by the
//! demo binary and the test suite.

pub mod sim;

use std::sync::Arc;
use std::time::Duration;

/// Opaque handle to an element owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub u64);

/// Handle to a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Handle to an intersection or mutation observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Handle to a scheduled one-shot task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Page visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Event kinds the host can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    PointerMove,
    PointerOver,
    Scroll,
    TouchMove,
    KeyPress,
    Wheel,
    VisibilityChange,
}

/// Where a listener is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// The document root; receives events that bubble all the way up.
    Document,
    /// A specific element; receives events targeting it or its descendants.
    Element(ElementId),
}

/// Listener registration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOptions {
    /// Passive listeners must not block the host's default scroll/gesture
    /// handling.
    pub passive: bool,
}

impl ListenerOptions {
    pub fn passive() -> Self {
        Self { passive: true }
    }
}

/// Payload delivered to an event listener.
#[derive(Debug, Clone, Copy)]
pub struct EventContext {
    pub kind: EventKind,
    /// The element the event originated at, when the event has one.
    pub target: Option<ElementId>,
    /// Present for [`EventKind::VisibilityChange`] only.
    pub visibility: Option<Visibility>,
}

/// One entry reported by an intersection observer.
#[derive(Debug, Clone, Copy)]
pub struct IntersectionEntry {
    pub element: ElementId,
    pub is_intersecting: bool,
}

pub type EventListener = Arc<dyn Fn(&EventContext) + Send + Sync>;
pub type IntersectionCallback = Arc<dyn Fn(&[IntersectionEntry]) + Send + Sync>;
pub type MutationCallback = Arc<dyn Fn() + Send + Sync>;
pub type Task = Box<dyn FnOnce() + Send>;

/// The environment the library runs against.
///
/// Selector strings follow the class convention: a leading dot selects by
/// class (`.track`), anything else selects by tag name (`body`).
pub trait Host: Send + Sync {
    /// Tag name of an element, or `None` if the element is gone.
    fn tag_name(&self, element: ElementId) -> Option<String>;

    /// Parent element, `None` at the root or for detached elements.
    fn parent(&self, element: ElementId) -> Option<ElementId>;

    fn has_class(&self, element: ElementId, class: &str) -> bool;

    /// Attribute value, `None` when absent.
    fn attribute(&self, element: ElementId, name: &str) -> Option<String>;

    /// Computed opacity in `[0.0, 1.0]`; detached elements report `0.0`.
    fn computed_opacity(&self, element: ElementId) -> f64;

    /// All elements matching the selector, in document order.
    fn query_all(&self, selector: &str) -> Vec<ElementId>;

    /// First element matching the selector.
    fn container(&self, selector: &str) -> Option<ElementId>;

    fn add_listener(
        &self,
        target: EventTarget,
        kind: EventKind,
        options: ListenerOptions,
        listener: EventListener,
    ) -> ListenerId;

    /// Removing an unknown or already-removed listener is a no-op.
    fn remove_listener(&self, id: ListenerId);

    /// Watch the given elements for viewport intersection at the given
    /// visible-area threshold.
    fn observe_intersections(
        &self,
        elements: &[ElementId],
        threshold: f64,
        callback: IntersectionCallback,
    ) -> ObserverId;

    /// Watch the subtree rooted at `root` for structural and attribute
    /// mutations at any depth.
    fn observe_mutations(&self, root: ElementId, callback: MutationCallback) -> ObserverId;

    /// Stop an observer returned by either `observe_*` call.
    fn disconnect(&self, id: ObserverId);

    /// Run `task` once after `delay`, unless canceled first.
    fn schedule(&self, delay: Duration, task: Task) -> TimerId;

    fn cancel(&self, id: TimerId);

    /// Current page visibility.
    fn visibility(&self) -> Visibility;
}
