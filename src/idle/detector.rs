//! Idle detector: watches user input and page visibility, emits
//! active/idle transitions after a configurable timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, SubscriberId};
use crate::host::{
    EventKind, EventTarget, Host, ListenerId, ListenerOptions, Visibility,
};

use super::IdleStatus;

/// Activity event kinds that reset the idle timer, with their listener
/// options. The move/scroll/touch/wheel group is passive so the host's
/// default scroll and gesture handling is never blocked.
const ACTIVITY_KINDS: [(EventKind, bool); 6] = [
    (EventKind::Click, false),
    (EventKind::PointerMove, true),
    (EventKind::Scroll, true),
    (EventKind::TouchMove, true),
    (EventKind::KeyPress, false),
    (EventKind::Wheel, true),
];

/// Shared state between listeners, the checker thread, and the public API.
struct DetectorState {
    /// Callback registry keyed by [`IdleStatus`].
    bus: Mutex<EventBus<IdleStatus>>,
    /// Timestamp of last activity (Unix epoch milliseconds). Updating it is
    /// both the timer cancellation and the re-arm: the checker compares
    /// elapsed time against the threshold.
    last_activity_ms: AtomicU64,
    /// Current status.
    is_idle: AtomicBool,
    /// Whether the checker is running.
    running: AtomicBool,
    /// Broadcast sender for status *changes* (active-to-active resets are
    /// not rebroadcast; the bus sees every qualifying event).
    state_tx: broadcast::Sender<IdleStatus>,
}

impl DetectorState {
    fn new() -> Self {
        let (state_tx, _) = broadcast::channel(16);
        let now_ms = Utc::now().timestamp_millis() as u64;
        Self {
            bus: Mutex::new(EventBus::new()),
            last_activity_ms: AtomicU64::new(now_ms),
            is_idle: AtomicBool::new(false),
            running: AtomicBool::new(true),
            state_tx,
        }
    }

    fn idle_duration(&self) -> Duration {
        let last_ms = self.last_activity_ms.load(Ordering::SeqCst);
        let now_ms = Utc::now().timestamp_millis() as u64;
        Duration::from_millis(now_ms.saturating_sub(last_ms))
    }

    /// Qualifying activity: rearm the timer, emit `active` (every event,
    /// not coalesced), and leave the idle state if set.
    fn activate(&self) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_activity_ms.store(now_ms, Ordering::SeqCst);
        self.bus.lock().unwrap().emit(&IdleStatus::Active);
        if self.is_idle.swap(false, Ordering::SeqCst) {
            debug!("user became active");
            let _ = self.state_tx.send(IdleStatus::Active);
        }
    }

    /// Enter the idle state; emits once per idle period.
    fn enter_idle(&self) {
        if self.is_idle.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("user became idle");
        self.bus.lock().unwrap().emit(&IdleStatus::Idle);
        let _ = self.state_tx.send(IdleStatus::Idle);
    }
}

/// Idle/active activity detector.
///
/// Attaches all activity listeners once at construction and arms the idle
/// timer immediately. Callbacks registered via [`IdleDetector::on`] run
/// synchronously on whichever thread triggered the transition; a panicking
/// callback propagates to that thread, and callbacks must not call back into
/// the same detector.
pub struct IdleDetector {
    host: Arc<dyn Host>,
    state: Arc<DetectorState>,
    listener_ids: Mutex<Vec<ListenerId>>,
}

impl IdleDetector {
    /// Create a detector and arm the idle timer.
    ///
    /// `idle_duration` is the inactivity window before `idle` is emitted;
    /// `check_interval` is the checker thread's polling granularity.
    pub fn new(host: Arc<dyn Host>, idle_duration: Duration, check_interval: Duration) -> Self {
        let state = Arc::new(DetectorState::new());

        let mut listener_ids = Vec::new();
        for (kind, passive) in ACTIVITY_KINDS {
            let state_clone = state.clone();
            let options = if passive {
                ListenerOptions::passive()
            } else {
                ListenerOptions::default()
            };
            let id = host.add_listener(
                EventTarget::Document,
                kind,
                options,
                Arc::new(move |_| state_clone.activate()),
            );
            listener_ids.push(id);
        }

        let state_clone = state.clone();
        let id = host.add_listener(
            EventTarget::Document,
            EventKind::VisibilityChange,
            ListenerOptions::default(),
            Arc::new(move |ctx| match ctx.visibility {
                Some(Visibility::Hidden) => state_clone.enter_idle(),
                Some(Visibility::Visible) => state_clone.activate(),
                None => {}
            }),
        );
        listener_ids.push(id);

        info!("starting idle detector with duration {:?}", idle_duration);

        let state_clone = state.clone();
        let spawned = thread::Builder::new()
            .name("idle-checker".to_string())
            .spawn(move || {
                run_idle_checker(state_clone, idle_duration, check_interval);
            });
        if let Err(e) = spawned {
            // Detector still works for visibility-driven transitions.
            warn!("failed to spawn idle checker: {}", e);
        }

        Self {
            host,
            state,
            listener_ids: Mutex::new(listener_ids),
        }
    }

    /// Register a callback for a status tag. Fires on every emission of that
    /// tag, including repeated `active` emissions while already active.
    pub fn on(&self, status: IdleStatus, callback: impl FnMut() + Send + 'static) -> SubscriberId {
        self.state.bus.lock().unwrap().on(status, callback)
    }

    /// Remove a callback registered with [`IdleDetector::on`].
    pub fn off(&self, id: SubscriberId) -> bool {
        self.state.bus.lock().unwrap().off(id)
    }

    /// Current status. Pure read, never triggers a transition.
    pub fn now(&self) -> IdleStatus {
        if self.state.is_idle.load(Ordering::SeqCst) {
            IdleStatus::Idle
        } else {
            IdleStatus::Active
        }
    }

    /// Subscribe to status changes over a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<IdleStatus> {
        self.state.state_tx.subscribe()
    }

    /// Detach every host listener and stop the checker thread. Safe to call
    /// more than once.
    pub fn clean(&self) {
        if self.state.running.swap(false, Ordering::SeqCst) {
            info!("idle detector stopped");
        }
        let ids: Vec<ListenerId> = self.listener_ids.lock().unwrap().drain(..).collect();
        for id in ids {
            self.host.remove_listener(id);
        }
    }
}

impl Drop for IdleDetector {
    fn drop(&mut self) {
        self.clean();
    }
}

/// Poll loop driving the active-to-idle transition.
///
/// No timer is armed while idle: once `enter_idle` runs, the loop cannot
/// fire again until activity clears the flag and rearms the timestamp.
fn run_idle_checker(state: Arc<DetectorState>, idle_duration: Duration, check_interval: Duration) {
    while state.running.load(Ordering::SeqCst) {
        thread::sleep(check_interval);

        if !state.is_idle.load(Ordering::SeqCst) && state.idle_duration() >= idle_duration {
            state.enter_idle();
        }
    }

    debug!("idle checker thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimHost;
    use std::sync::atomic::AtomicUsize;

    fn detector(host: &Arc<SimHost>, idle_ms: u64, check_ms: u64) -> IdleDetector {
        IdleDetector::new(
            host.clone() as Arc<dyn Host>,
            Duration::from_millis(idle_ms),
            Duration::from_millis(check_ms),
        )
    }

    fn counter(detector: &IdleDetector, status: IdleStatus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        detector.on(status, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_idle_emitted_exactly_once_without_activity() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 100, 15);
        let idle_count = counter(&detector, IdleStatus::Idle);

        assert_eq!(detector.now(), IdleStatus::Active);
        thread::sleep(Duration::from_millis(200));
        assert_eq!(detector.now(), IdleStatus::Idle);
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);

        // No timer is armed while idle; no further emissions.
        thread::sleep(Duration::from_millis(150));
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_activity_resets_timer() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 250, 20);
        let idle_count = counter(&detector, IdleStatus::Idle);
        let active_count = counter(&detector, IdleStatus::Active);

        let root = host.root();
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(60));
            host.dispatch(EventKind::PointerMove, root);
            assert_eq!(detector.now(), IdleStatus::Active);
        }
        assert_eq!(idle_count.load(Ordering::SeqCst), 0);
        assert_eq!(active_count.load(Ordering::SeqCst), 5);

        // Idle fires only after the last activity event.
        thread::sleep(Duration::from_millis(400));
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);
        assert_eq!(detector.now(), IdleStatus::Idle);
    }

    #[test]
    fn test_every_activity_kind_emits_active() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 500, 50);
        let active_count = counter(&detector, IdleStatus::Active);

        let root = host.root();
        for (kind, _) in ACTIVITY_KINDS {
            host.dispatch(kind, root);
        }
        assert_eq!(active_count.load(Ordering::SeqCst), ACTIVITY_KINDS.len());
        assert_eq!(detector.now(), IdleStatus::Active);
    }

    #[test]
    fn test_hidden_emits_idle_immediately_and_visible_rearms() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 150, 15);
        let idle_count = counter(&detector, IdleStatus::Idle);
        let active_count = counter(&detector, IdleStatus::Active);

        host.set_visibility(Visibility::Hidden);
        assert_eq!(detector.now(), IdleStatus::Idle);
        assert_eq!(idle_count.load(Ordering::SeqCst), 1);

        host.set_visibility(Visibility::Visible);
        assert_eq!(detector.now(), IdleStatus::Active);
        assert_eq!(active_count.load(Ordering::SeqCst), 1);

        // The timer was rearmed on the visible transition.
        thread::sleep(Duration::from_millis(250));
        assert_eq!(idle_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscribe_receives_transition() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 80, 15);
        let mut rx = detector.subscribe();

        thread::sleep(Duration::from_millis(180));
        let status = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(status, IdleStatus::Idle);

        host.dispatch(EventKind::Click, host.root());
        let status = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(status, IdleStatus::Active);
    }

    #[test]
    fn test_off_unsubscribes() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 500, 50);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = detector.on(IdleStatus::Active, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        host.dispatch(EventKind::Click, host.root());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(detector.off(id));
        host.dispatch(EventKind::Click, host.root());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clean_detaches_listeners_and_is_idempotent() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 100, 15);
        let active_count = counter(&detector, IdleStatus::Active);

        // Six activity listeners plus the visibility listener; the
        // move/scroll/touch/wheel group is passive.
        assert_eq!(host.listener_count(), 7);
        assert_eq!(host.passive_listener_count(), 4);

        detector.clean();
        assert_eq!(host.listener_count(), 0);

        host.dispatch(EventKind::Click, host.root());
        assert_eq!(active_count.load(Ordering::SeqCst), 0);

        detector.clean();
        assert_eq!(host.listener_count(), 0);
    }

    #[test]
    fn test_one_second_idle_duration() {
        let host = Arc::new(SimHost::new());
        let detector = detector(&host, 1000, 50);

        thread::sleep(Duration::from_millis(1100));
        assert_eq!(detector.now(), IdleStatus::Idle);
    }
}
