//! Viewport-exposure tracking.
//!
//! Every element matching the selector is registered with an intersection
//! observer; an element is reported as exposed only when it intersects at the
//! visible-area threshold while fully opaque. A mutation observer on the
//! container subtree re-creates the registration whenever the tree changes,
//! rate-limited trailing-edge so mutation bursts collapse to one
//! re-registration using the element set live at execution time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::host::{ElementId, Host, IntersectionEntry, ObserverId};

use super::throttle::Throttle;
use super::{LogEvent, LogRecord, ReportLog};

/// Minimum visible-area ratio for an exposure report.
const EXPOSURE_THRESHOLD: f64 = 0.3;

/// Owns the intersection observer and knows how to rebuild it from the live
/// element set.
struct Registrar {
    host: Arc<dyn Host>,
    selector: String,
    log_attribute_name: String,
    report_log: ReportLog,
    observer: Mutex<Option<ObserverId>>,
}

impl Registrar {
    /// Replace the current observer with one over the elements matching the
    /// selector right now.
    fn register(&self) {
        let mut observer = self.observer.lock().unwrap();
        if let Some(id) = observer.take() {
            self.host.disconnect(id);
        }

        let elements = self.host.query_all(&self.selector);
        debug!("observing {} elements for exposure", elements.len());

        let host = self.host.clone();
        let attribute = self.log_attribute_name.clone();
        let report_log = self.report_log.clone();
        let id = self.host.observe_intersections(
            &elements,
            EXPOSURE_THRESHOLD,
            Arc::new(move |entries: &[IntersectionEntry]| {
                for entry in entries {
                    // Partially transparent or animating-in elements do not
                    // count as exposed.
                    if entry.is_intersecting && host.computed_opacity(entry.element) == 1.0 {
                        report_log(LogRecord {
                            event: LogEvent::Exposure,
                            data: host.attribute(entry.element, &attribute),
                        });
                    } else {
                        debug!("element {:?} not exposed", entry.element);
                    }
                }
            }),
        );
        *observer = Some(id);
    }

    fn disconnect(&self) {
        if let Some(id) = self.observer.lock().unwrap().take() {
            self.host.disconnect(id);
        }
    }
}

/// Exposure facility of the interaction tracker.
pub(crate) struct ExposureTracker {
    host: Arc<dyn Host>,
    registrar: Arc<Registrar>,
    throttle: Arc<Throttle>,
    mutation_observer: Mutex<Option<ObserverId>>,
}

impl ExposureTracker {
    pub(crate) fn new(
        host: Arc<dyn Host>,
        container: ElementId,
        selector: &str,
        log_attribute_name: &str,
        reobserve_window: Duration,
        report_log: ReportLog,
    ) -> Self {
        let registrar = Arc::new(Registrar {
            host: host.clone(),
            selector: selector.to_string(),
            log_attribute_name: log_attribute_name.to_string(),
            report_log,
            observer: Mutex::new(None),
        });
        registrar.register();

        let registrar_clone = registrar.clone();
        let throttle = Arc::new(Throttle::new(
            host.clone(),
            reobserve_window,
            Arc::new(move || registrar_clone.register()),
        ));

        let throttle_clone = throttle.clone();
        let mutation_observer = host.observe_mutations(
            container,
            Arc::new(move || throttle_clone.trigger()),
        );

        Self {
            host,
            registrar,
            throttle,
            mutation_observer: Mutex::new(Some(mutation_observer)),
        }
    }

    /// Cancel any pending re-registration and disconnect both observers.
    pub(crate) fn clean(&self) {
        self.throttle.cancel();
        if let Some(id) = self.mutation_observer.lock().unwrap().take() {
            self.host.disconnect(id);
        }
        self.registrar.disconnect();
    }
}

impl Drop for ExposureTracker {
    fn drop(&mut self) {
        self.clean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimHost;
    use std::thread;

    fn collector() -> (ReportLog, Arc<Mutex<Vec<LogRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let records_clone = records.clone();
        let report: ReportLog = Arc::new(move |record| {
            records_clone.lock().unwrap().push(record);
        });
        (report, records)
    }

    fn tracked_element(host: &SimHost, data: &str) -> ElementId {
        let element = host.create_element("div");
        host.add_class(element, "track");
        host.set_attribute(element, "data-log", data);
        host.append_child(host.root(), element);
        element
    }

    fn exposure(host: &Arc<SimHost>, report: ReportLog, window_ms: u64) -> ExposureTracker {
        ExposureTracker::new(
            host.clone() as Arc<dyn Host>,
            host.root(),
            ".track",
            "data-log",
            Duration::from_millis(window_ms),
            report,
        )
    }

    #[test]
    fn test_exposure_reported_when_intersecting_and_opaque() {
        let host = Arc::new(SimHost::new());
        let element = tracked_element(&host, "banner");
        let (report, records) = collector();
        let _tracker = exposure(&host, report, 3000);

        host.set_viewport_ratio(element, 0.5);
        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, LogEvent::Exposure);
        assert_eq!(records[0].data.as_deref(), Some("banner"));
    }

    #[test]
    fn test_below_threshold_not_reported() {
        let host = Arc::new(SimHost::new());
        let element = tracked_element(&host, "banner");
        let (report, records) = collector();
        let _tracker = exposure(&host, report, 3000);

        host.set_viewport_ratio(element, 0.2);
        assert!(records.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transparent_element_not_reported() {
        let host = Arc::new(SimHost::new());
        let element = tracked_element(&host, "banner");
        let (report, records) = collector();
        let _tracker = exposure(&host, report, 3000);

        host.set_viewport_ratio(element, 0.8);
        assert_eq!(records.lock().unwrap().len(), 1);

        // Still intersecting, no longer fully opaque: no further report.
        host.set_opacity(element, 0.5);
        host.set_viewport_ratio(element, 0.9);
        assert_eq!(records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_mutation_burst_collapses_to_one_trailing_reregistration() {
        let host = Arc::new(SimHost::new());
        let first = tracked_element(&host, "first");
        let (report, _records) = collector();
        let _tracker = exposure(&host, report, 80);
        assert_eq!(host.intersection_observer_creations(), 1);

        let mut added = Vec::new();
        for i in 0..5 {
            added.push(tracked_element(&host, &format!("added-{}", i)));
        }
        // Trailing window still open: nothing re-registered yet.
        assert_eq!(host.intersection_observer_creations(), 1);

        thread::sleep(Duration::from_millis(200));
        assert_eq!(host.intersection_observer_creations(), 2);
        assert_eq!(host.intersection_observer_count(), 1);

        // Re-registration used the element set live at execution time.
        let observed = host.observed_elements();
        assert!(observed.contains(&first));
        for element in added {
            assert!(observed.contains(&element));
        }
    }

    #[test]
    fn test_clean_disconnects_and_cancels() {
        let host = Arc::new(SimHost::new());
        let element = tracked_element(&host, "banner");
        let (report, records) = collector();
        let tracker = exposure(&host, report, 40);

        tracked_element(&host, "late");
        tracker.clean();
        assert_eq!(host.intersection_observer_count(), 0);

        thread::sleep(Duration::from_millis(100));
        // The pending re-registration was canceled with everything else.
        assert_eq!(host.intersection_observer_creations(), 1);

        host.set_viewport_ratio(element, 0.9);
        assert!(records.lock().unwrap().is_empty());
    }
}
