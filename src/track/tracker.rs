//! Click and hover tracking with event delegation, composed with the
//! exposure facility.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::TrackerConfig;
use crate::host::{ElementId, EventContext, EventKind, EventTarget, Host, ListenerId, ListenerOptions};

use super::exposure::ExposureTracker;
use super::{LogEvent, LogRecord, ReportLog};

/// Shared matching and reporting logic for the click and hover handlers.
struct HandlerCore {
    host: Arc<dyn Host>,
    /// Marker class, derived from the selector with the leading dot
    /// stripped.
    marker_class: String,
    container: ElementId,
    log_attribute_name: String,
    report_log: ReportLog,
}

impl HandlerCore {
    fn generate_log(&self, event: LogEvent, element: ElementId) -> LogRecord {
        LogRecord {
            event,
            data: self.host.attribute(element, &self.log_attribute_name),
        }
    }

    /// Find the element a report should be attributed to.
    ///
    /// The event target itself wins if it carries the marker. Otherwise the
    /// walk goes up parent by parent, halting without a match at the
    /// container, or (for clicks) at an anchor element.
    fn resolve(&self, target: ElementId, stop_at_anchor: bool) -> Option<ElementId> {
        if self.host.has_class(target, &self.marker_class) {
            return Some(target);
        }
        let mut current = self.host.parent(target);
        while let Some(element) = current {
            if stop_at_anchor {
                if let Some(tag) = self.host.tag_name(element) {
                    if tag.eq_ignore_ascii_case("a") {
                        return None;
                    }
                }
            }
            if element == self.container {
                return None;
            }
            if self.host.has_class(element, &self.marker_class) {
                return Some(element);
            }
            current = self.host.parent(element);
        }
        None
    }

    fn handle(&self, event: LogEvent, context: &EventContext) {
        let target = match context.target {
            Some(target) => target,
            None => return,
        };
        let stop_at_anchor = event == LogEvent::Click;
        if let Some(element) = self.resolve(target, stop_at_anchor) {
            (self.report_log)(self.generate_log(event, element));
        }
    }
}

/// Tracks clicks, hovers, and viewport exposure of marked elements inside a
/// container.
///
/// All listener groups attach at construction. A delegated listener at the
/// container covers bubbling events; elements matching both the selector and
/// the stop-propagation class additionally get direct listeners, since their
/// own handlers block the bubbling that delegation relies on. Elements added
/// after construction are covered by delegation only.
pub struct InteractionTracker {
    host: Arc<dyn Host>,
    listener_ids: Mutex<Vec<ListenerId>>,
    exposure: Option<ExposureTracker>,
}

impl InteractionTracker {
    /// Attach all three tracking facilities.
    ///
    /// When the container selector matches nothing, tracking silently does
    /// nothing; no listener or observer is registered.
    pub fn new(host: Arc<dyn Host>, config: &TrackerConfig, report_log: ReportLog) -> Self {
        let container = match host.container(&config.container_selector) {
            Some(container) => container,
            None => {
                debug!(
                    "container selector {:?} matched nothing; tracking disabled",
                    config.container_selector
                );
                return Self {
                    host,
                    listener_ids: Mutex::new(Vec::new()),
                    exposure: None,
                };
            }
        };

        let marker_class = config.selector.trim_start_matches('.').to_string();
        let core = Arc::new(HandlerCore {
            host: host.clone(),
            marker_class,
            container,
            log_attribute_name: config.log_attribute_name.clone(),
            report_log: report_log.clone(),
        });

        // Direct listeners go on elements whose own handlers stop
        // propagation; for everything else delegation at the container is
        // enough.
        let stop_elements: Vec<ElementId> = host
            .query_all(&config.selector)
            .into_iter()
            .filter(|el| host.has_class(*el, &config.stop_propagation_class_name))
            .collect();

        let mut listener_ids = Vec::new();
        for (kind, event) in [
            (EventKind::Click, LogEvent::Click),
            (EventKind::PointerOver, LogEvent::Hover),
        ] {
            let core_clone = core.clone();
            let listener: crate::host::EventListener =
                Arc::new(move |ctx| core_clone.handle(event, ctx));

            listener_ids.push(host.add_listener(
                EventTarget::Element(container),
                kind,
                ListenerOptions::default(),
                listener.clone(),
            ));
            for element in &stop_elements {
                listener_ids.push(host.add_listener(
                    EventTarget::Element(*element),
                    kind,
                    ListenerOptions::default(),
                    listener.clone(),
                ));
            }
        }

        info!(
            "interaction tracker attached: {} direct stop-propagation elements",
            stop_elements.len()
        );

        let exposure = ExposureTracker::new(
            host.clone(),
            container,
            &config.selector,
            &config.log_attribute_name,
            config.reobserve_window(),
            report_log,
        );

        Self {
            host,
            listener_ids: Mutex::new(listener_ids),
            exposure: Some(exposure),
        }
    }

    /// Construct with per-field defaults from [`TrackerConfig::default`].
    pub fn with_defaults(host: Arc<dyn Host>, report_log: ReportLog) -> Self {
        Self::new(host, &TrackerConfig::default(), report_log)
    }

    /// Detach every listener and observer. Safe to call more than once.
    pub fn clean(&self) {
        let ids: Vec<ListenerId> = self.listener_ids.lock().unwrap().drain(..).collect();
        for id in ids {
            self.host.remove_listener(id);
        }
        if let Some(exposure) = &self.exposure {
            exposure.clean();
        }
    }
}

impl Drop for InteractionTracker {
    fn drop(&mut self) {
        self.clean();
    }
}
