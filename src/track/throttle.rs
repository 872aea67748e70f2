//! Trailing-edge rate limiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::trace;

use crate::host::{Host, TimerId};

/// Collapses repeated triggers within a window into a single execution at
/// the end of the window.
///
/// The first [`Throttle::trigger`] of a window schedules the task via the
/// host; further triggers within the window are no-ops. The task therefore
/// runs against live state at execution time, not the state at the first
/// trigger.
pub struct Throttle {
    host: Arc<dyn Host>,
    window: Duration,
    task: Arc<dyn Fn() + Send + Sync>,
    pending: Arc<AtomicBool>,
    timer: Mutex<Option<TimerId>>,
}

impl Throttle {
    pub fn new(host: Arc<dyn Host>, window: Duration, task: Arc<dyn Fn() + Send + Sync>) -> Self {
        Self {
            host,
            window,
            task,
            pending: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
        }
    }

    /// Request an execution. At most one task is outstanding at a time.
    pub fn trigger(&self) {
        if self.pending.swap(true, Ordering::SeqCst) {
            trace!("throttle trigger collapsed into pending task");
            return;
        }
        let pending = self.pending.clone();
        let task = self.task.clone();
        let id = self.host.schedule(
            self.window,
            Box::new(move || {
                pending.store(false, Ordering::SeqCst);
                task();
            }),
        );
        *self.timer.lock().unwrap() = Some(id);
    }

    /// Drop any pending execution.
    pub fn cancel(&self) {
        if let Some(id) = self.timer.lock().unwrap().take() {
            self.host.cancel(id);
        }
        self.pending.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::sim::SimHost;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn throttle(host: &Arc<SimHost>, window_ms: u64) -> (Throttle, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let throttle = Throttle::new(
            host.clone() as Arc<dyn Host>,
            Duration::from_millis(window_ms),
            Arc::new(move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (throttle, runs)
    }

    #[test]
    fn test_burst_collapses_to_single_trailing_execution() {
        let host = Arc::new(SimHost::new());
        let (throttle, runs) = throttle(&host, 60);

        for _ in 0..5 {
            throttle.trigger();
        }
        // Trailing, not leading: nothing has run inside the window.
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        thread::sleep(Duration::from_millis(140));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_new_window_after_execution() {
        let host = Arc::new(SimHost::new());
        let (throttle, runs) = throttle(&host, 40);

        throttle.trigger();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        throttle.trigger();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cancel_drops_pending_task() {
        let host = Arc::new(SimHost::new());
        let (throttle, runs) = throttle(&host, 40);

        throttle.trigger();
        throttle.cancel();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
