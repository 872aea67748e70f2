//! In-memory host implementation.
//!
//! [`SimHost`] models just enough of a page for the library to run against:
//! an element tree with classes and attributes, bubbling event dispatch with
//! stop-propagation nodes, a visibility flag, viewport-ratio driven
//! intersection callbacks, subtree mutation notification, and thread-backed
//! one-shot timers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{
    ElementId, EventContext, EventKind, EventListener, EventTarget, Host, IntersectionCallback,
    IntersectionEntry, ListenerId, ListenerOptions, MutationCallback, ObserverId, Task, TimerId,
    Visibility,
};

struct SimElement {
    tag: String,
    classes: Vec<String>,
    attributes: HashMap<String, String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    opacity: f64,
    /// The element's own handlers swallow bubbling, as a page handler
    /// calling `stopPropagation` would.
    stops_propagation: bool,
}

struct ListenerRecord {
    target: EventTarget,
    kind: EventKind,
    options: ListenerOptions,
    listener: EventListener,
}

struct IntersectionRecord {
    elements: Vec<ElementId>,
    threshold: f64,
    callback: IntersectionCallback,
}

struct MutationRecord {
    root: ElementId,
    callback: MutationCallback,
}

struct SimState {
    elements: HashMap<ElementId, SimElement>,
    root: ElementId,
    visibility: Visibility,
    listeners: Vec<(ListenerId, ListenerRecord)>,
    intersections: Vec<(ObserverId, IntersectionRecord)>,
    mutations: Vec<(ObserverId, MutationRecord)>,
    ratios: HashMap<ElementId, f64>,
}

/// Simulated host environment.
pub struct SimHost {
    state: Mutex<SimState>,
    next_id: AtomicU64,
    intersection_creations: AtomicU64,
    canceled_timers: Arc<Mutex<HashSet<TimerId>>>,
}

impl SimHost {
    /// Create a host with an empty `body` root element.
    pub fn new() -> Self {
        let root = ElementId(0);
        let mut elements = HashMap::new();
        elements.insert(
            root,
            SimElement {
                tag: "body".to_string(),
                classes: Vec::new(),
                attributes: HashMap::new(),
                parent: None,
                children: Vec::new(),
                opacity: 1.0,
                stops_propagation: false,
            },
        );
        Self {
            state: Mutex::new(SimState {
                elements,
                root,
                visibility: Visibility::Visible,
                listeners: Vec::new(),
                intersections: Vec::new(),
                mutations: Vec::new(),
                ratios: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            intersection_creations: AtomicU64::new(0),
            canceled_timers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// The root `body` element.
    pub fn root(&self) -> ElementId {
        self.state.lock().unwrap().root
    }

    /// Create a detached element. Attach it with [`SimHost::append_child`].
    pub fn create_element(&self, tag: &str) -> ElementId {
        let id = ElementId(self.fresh_id());
        self.state.lock().unwrap().elements.insert(
            id,
            SimElement {
                tag: tag.to_string(),
                classes: Vec::new(),
                attributes: HashMap::new(),
                parent: None,
                children: Vec::new(),
                opacity: 1.0,
                stops_propagation: false,
            },
        );
        id
    }

    pub fn add_class(&self, element: ElementId, class: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(el) = state.elements.get_mut(&element) {
            if !el.classes.iter().any(|c| c == class) {
                el.classes.push(class.to_string());
            }
        }
    }

    pub fn set_opacity(&self, element: ElementId, opacity: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(el) = state.elements.get_mut(&element) {
            el.opacity = opacity;
        }
    }

    pub fn set_stops_propagation(&self, element: ElementId, stops: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(el) = state.elements.get_mut(&element) {
            el.stops_propagation = stops;
        }
    }

    /// Set an attribute and notify mutation observers covering the element.
    pub fn set_attribute(&self, element: ElementId, name: &str, value: &str) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            if let Some(el) = state.elements.get_mut(&element) {
                el.attributes.insert(name.to_string(), value.to_string());
            }
            mutation_callbacks(&state, element)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Attach `child` under `parent` and notify mutation observers.
    pub fn append_child(&self, parent: ElementId, child: ElementId) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            if !state.elements.contains_key(&parent) || !state.elements.contains_key(&child) {
                return;
            }
            if let Some(el) = state.elements.get_mut(&child) {
                el.parent = Some(parent);
            }
            if let Some(el) = state.elements.get_mut(&parent) {
                el.children.push(child);
            }
            mutation_callbacks(&state, parent)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Detach an element (and its subtree) and notify mutation observers.
    pub fn remove_element(&self, element: ElementId) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            let parent = match state.elements.get(&element).and_then(|el| el.parent) {
                Some(p) => p,
                None => return,
            };
            if let Some(p) = state.elements.get_mut(&parent) {
                p.children.retain(|c| *c != element);
            }
            remove_subtree(&mut state, element);
            mutation_callbacks(&state, parent)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Dispatch an input event at `target`, bubbling toward the root.
    ///
    /// Listeners attached to each element on the path fire in registration
    /// order; a stop-propagation element halts the walk after its own
    /// listeners ran. Document-level listeners fire last, only if the event
    /// bubbled all the way up.
    pub fn dispatch(&self, kind: EventKind, target: ElementId) {
        let context = EventContext {
            kind,
            target: Some(target),
            visibility: None,
        };
        let listeners = {
            let state = self.state.lock().unwrap();
            if !state.elements.contains_key(&target) {
                return;
            }
            let mut to_invoke: Vec<EventListener> = Vec::new();
            let mut stopped = false;
            let mut current = Some(target);
            while let Some(element) = current {
                for (_, record) in &state.listeners {
                    if record.kind == kind && record.target == EventTarget::Element(element) {
                        to_invoke.push(record.listener.clone());
                    }
                }
                let el = &state.elements[&element];
                if el.stops_propagation {
                    stopped = true;
                    break;
                }
                current = el.parent;
            }
            if !stopped {
                for (_, record) in &state.listeners {
                    if record.kind == kind && record.target == EventTarget::Document {
                        to_invoke.push(record.listener.clone());
                    }
                }
            }
            to_invoke
        };
        for listener in listeners {
            listener(&context);
        }
    }

    /// Change page visibility and fire visibility-change listeners.
    pub fn set_visibility(&self, visibility: Visibility) {
        let context = EventContext {
            kind: EventKind::VisibilityChange,
            target: None,
            visibility: Some(visibility),
        };
        let listeners = {
            let mut state = self.state.lock().unwrap();
            state.visibility = visibility;
            state
                .listeners
                .iter()
                .filter(|(_, r)| r.kind == EventKind::VisibilityChange)
                .map(|(_, r)| r.listener.clone())
                .collect::<Vec<_>>()
        };
        for listener in listeners {
            listener(&context);
        }
    }

    /// Set an element's visible-area ratio and fire intersection observers
    /// watching it. An unchanged ratio fires nothing.
    pub fn set_viewport_ratio(&self, element: ElementId, ratio: f64) {
        let callbacks = {
            let mut state = self.state.lock().unwrap();
            if state.ratios.insert(element, ratio) == Some(ratio) {
                return;
            }
            state
                .intersections
                .iter()
                .filter(|(_, r)| r.elements.contains(&element))
                .map(|(_, r)| {
                    let entry = IntersectionEntry {
                        element,
                        is_intersecting: ratio >= r.threshold,
                    };
                    (r.callback.clone(), entry)
                })
                .collect::<Vec<_>>()
        };
        for (callback, entry) in callbacks {
            callback(&[entry]);
        }
    }

    /// Number of live event listeners, all kinds and targets.
    pub fn listener_count(&self) -> usize {
        self.state.lock().unwrap().listeners.len()
    }

    /// Number of live listeners registered as passive.
    pub fn passive_listener_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .listeners
            .iter()
            .filter(|(_, r)| r.options.passive)
            .count()
    }

    /// Number of live intersection observers.
    pub fn intersection_observer_count(&self) -> usize {
        self.state.lock().unwrap().intersections.len()
    }

    /// Total intersection observers ever created.
    pub fn intersection_observer_creations(&self) -> u64 {
        self.intersection_creations.load(Ordering::SeqCst)
    }

    /// Elements currently registered with intersection observers.
    pub fn observed_elements(&self) -> Vec<ElementId> {
        let state = self.state.lock().unwrap();
        state
            .intersections
            .iter()
            .flat_map(|(_, r)| r.elements.iter().copied())
            .collect()
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Collect mutation callbacks whose root covers `changed` (ancestor-or-self).
fn mutation_callbacks(state: &SimState, changed: ElementId) -> Vec<MutationCallback> {
    let mut ancestors = HashSet::new();
    let mut current = Some(changed);
    while let Some(element) = current {
        ancestors.insert(element);
        current = state.elements.get(&element).and_then(|el| el.parent);
    }
    state
        .mutations
        .iter()
        .filter(|(_, r)| ancestors.contains(&r.root))
        .map(|(_, r)| r.callback.clone())
        .collect()
}

fn remove_subtree(state: &mut SimState, element: ElementId) {
    let children = state
        .elements
        .get(&element)
        .map(|el| el.children.clone())
        .unwrap_or_default();
    for child in children {
        remove_subtree(state, child);
    }
    state.elements.remove(&element);
    state.ratios.remove(&element);
}

fn matches(element: &SimElement, selector: &str) -> bool {
    match selector.strip_prefix('.') {
        Some(class) => element.classes.iter().any(|c| c == class),
        None => element.tag.eq_ignore_ascii_case(selector),
    }
}

fn collect_matches(state: &SimState, element: ElementId, selector: &str, out: &mut Vec<ElementId>) {
    if let Some(el) = state.elements.get(&element) {
        if matches(el, selector) {
            out.push(element);
        }
        for child in el.children.clone() {
            collect_matches(state, child, selector, out);
        }
    }
}

impl Host for SimHost {
    fn tag_name(&self, element: ElementId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(&element)
            .map(|el| el.tag.clone())
    }

    fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(&element)
            .and_then(|el| el.parent)
    }

    fn has_class(&self, element: ElementId, class: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(&element)
            .map(|el| el.classes.iter().any(|c| c == class))
            .unwrap_or(false)
    }

    fn attribute(&self, element: ElementId, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(&element)
            .and_then(|el| el.attributes.get(name).cloned())
    }

    fn computed_opacity(&self, element: ElementId) -> f64 {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(&element)
            .map(|el| el.opacity)
            .unwrap_or(0.0)
    }

    fn query_all(&self, selector: &str) -> Vec<ElementId> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        collect_matches(&state, state.root, selector, &mut out);
        out
    }

    fn container(&self, selector: &str) -> Option<ElementId> {
        self.query_all(selector).into_iter().next()
    }

    fn add_listener(
        &self,
        target: EventTarget,
        kind: EventKind,
        options: ListenerOptions,
        listener: EventListener,
    ) -> ListenerId {
        let id = ListenerId(self.fresh_id());
        self.state.lock().unwrap().listeners.push((
            id,
            ListenerRecord {
                target,
                kind,
                options,
                listener,
            },
        ));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state
            .lock()
            .unwrap()
            .listeners
            .retain(|(listener_id, _)| *listener_id != id);
    }

    fn observe_intersections(
        &self,
        elements: &[ElementId],
        threshold: f64,
        callback: IntersectionCallback,
    ) -> ObserverId {
        let id = ObserverId(self.fresh_id());
        self.intersection_creations.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().intersections.push((
            id,
            IntersectionRecord {
                elements: elements.to_vec(),
                threshold,
                callback,
            },
        ));
        id
    }

    fn observe_mutations(&self, root: ElementId, callback: MutationCallback) -> ObserverId {
        let id = ObserverId(self.fresh_id());
        self.state
            .lock()
            .unwrap()
            .mutations
            .push((id, MutationRecord { root, callback }));
        id
    }

    fn disconnect(&self, id: ObserverId) {
        let mut state = self.state.lock().unwrap();
        state.intersections.retain(|(observer_id, _)| *observer_id != id);
        state.mutations.retain(|(observer_id, _)| *observer_id != id);
    }

    fn schedule(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.fresh_id());
        let canceled = self.canceled_timers.clone();
        let result = thread::Builder::new()
            .name("sim-timer".to_string())
            .spawn(move || {
                thread::sleep(delay);
                if canceled.lock().unwrap().remove(&id) {
                    debug!("timer {:?} canceled before firing", id);
                    return;
                }
                task();
            });
        if let Err(e) = result {
            debug!("failed to spawn timer thread: {}", e);
        }
        id
    }

    fn cancel(&self, id: TimerId) {
        self.canceled_timers.lock().unwrap().insert(id);
    }

    fn visibility(&self) -> Visibility {
        self.state.lock().unwrap().visibility
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_query_all_by_class_and_tag() {
        let host = SimHost::new();
        let a = host.create_element("div");
        host.add_class(a, "track");
        let b = host.create_element("a");
        host.append_child(host.root(), a);
        host.append_child(a, b);

        assert_eq!(host.query_all(".track"), vec![a]);
        assert_eq!(host.query_all("a"), vec![b]);
        assert_eq!(host.container("body"), Some(host.root()));
        assert!(host.query_all(".missing").is_empty());
    }

    #[test]
    fn test_dispatch_bubbles_to_document() {
        let host = SimHost::new();
        let child = host.create_element("div");
        host.append_child(host.root(), child);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        host.add_listener(
            EventTarget::Document,
            EventKind::Click,
            ListenerOptions::default(),
            Arc::new(move |ctx| {
                assert_eq!(ctx.target, Some(child));
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        host.dispatch(EventKind::Click, child);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_propagation_blocks_document_listener() {
        let host = SimHost::new();
        let blocker = host.create_element("div");
        host.set_stops_propagation(blocker, true);
        host.append_child(host.root(), blocker);

        let document_hits = Arc::new(AtomicUsize::new(0));
        let direct_hits = Arc::new(AtomicUsize::new(0));
        let document_hits_clone = document_hits.clone();
        host.add_listener(
            EventTarget::Document,
            EventKind::Click,
            ListenerOptions::default(),
            Arc::new(move |_| {
                document_hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let direct_hits_clone = direct_hits.clone();
        host.add_listener(
            EventTarget::Element(blocker),
            EventKind::Click,
            ListenerOptions::default(),
            Arc::new(move |_| {
                direct_hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        host.dispatch(EventKind::Click, blocker);
        assert_eq!(direct_hits.load(Ordering::SeqCst), 1);
        assert_eq!(document_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_mutation_observer_covers_subtree_only() {
        let host = SimHost::new();
        let inside = host.create_element("div");
        host.append_child(host.root(), inside);
        let outside = host.create_element("div");

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        host.observe_mutations(
            host.root(),
            Arc::new(move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        host.set_attribute(inside, "data-log", "x");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Detached element: no observer root covers it.
        host.set_attribute(outside, "data-log", "y");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_canceled_timer_does_not_fire() {
        let host = SimHost::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let id = host.schedule(
            Duration::from_millis(30),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        host.cancel(id);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_timer_fires_after_delay() {
        let host = SimHost::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        host.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
