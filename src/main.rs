//! Attent demo binary.
//!
//! Wires the idle detector and interaction tracker against a simulated host
//! page, reporting interactions to a JSONL sink. Simulated input runs for a
//! few ticks, then pauses so the idle transition can be observed.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use attent::config::Config;
use attent::host::sim::SimHost;
use attent::host::{ElementId, EventKind, Host};
use attent::idle::{IdleDetector, IdleStatus};
use attent::logging::JsonlLogger;
use attent::track::{InteractionTracker, ReportLog};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Elements the demo loop drives input against.
struct DemoPage {
    banner: ElementId,
    menu_item: ElementId,
    modal_close: ElementId,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // Load configuration
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    // Initialize tracing
    init_tracing(&config.logging.level)?;

    info!("Starting attent v{}", VERSION);
    info!(
        "Configuration loaded: idle duration={}s, selector={}, container={}",
        config.idle.idle_duration_secs, config.tracker.selector, config.tracker.container_selector
    );

    let (host, page) = build_page();

    let logger = Arc::new(Mutex::new(JsonlLogger::new(config.logging.logs_dir())?));
    logger.lock().unwrap().log_session_start(VERSION)?;

    // Count records as they pass through to the sink.
    let records_logged = Arc::new(AtomicU64::new(0));
    let jsonl_report = JsonlLogger::reporter(logger.clone());
    let records_logged_clone = records_logged.clone();
    let report_log: ReportLog = Arc::new(move |record| {
        info!("Reported {:?} (data: {:?})", record.event, record.data);
        records_logged_clone.fetch_add(1, Ordering::SeqCst);
        jsonl_report(record);
    });

    let tracker = InteractionTracker::new(host.clone() as Arc<dyn Host>, &config.tracker, report_log);
    let detector = IdleDetector::new(
        host.clone() as Arc<dyn Host>,
        config.idle.idle_duration(),
        config.idle.check_interval(),
    );
    let mut activity_rx = detector.subscribe();

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(2));
    let mut tick: u32 = 0;

    info!("Entering demo loop (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick += 1;
                match tick {
                    1 => host.dispatch(EventKind::Click, page.banner),
                    2 => host.dispatch(EventKind::PointerOver, page.menu_item),
                    3 => host.set_viewport_ratio(page.banner, 0.8),
                    4 => host.dispatch(EventKind::Click, page.modal_close),
                    5 => info!("Pausing simulated input; waiting for the idle timer"),
                    _ => debug!("tick {} (no simulated input)", tick),
                }
            }
            Ok(status) = activity_rx.recv() => {
                match status {
                    IdleStatus::Idle => {
                        info!("User idle");
                        let _ = logger.lock().unwrap().log_idle_start(config.idle.idle_duration_secs);
                    }
                    IdleStatus::Active => {
                        info!("User activity resumed");
                        let _ = logger.lock().unwrap().log_idle_end();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    tracker.clean();
    detector.clean();
    logger
        .lock()
        .unwrap()
        .log_session_end(records_logged.load(Ordering::SeqCst))?;

    info!("Logged {} records total. Goodbye!", records_logged.load(Ordering::SeqCst));
    Ok(())
}

/// Build a small simulated page: a tracked banner, a tracked menu item
/// behind an anchor, and a modal-close button that stops propagation.
fn build_page() -> (Arc<SimHost>, DemoPage) {
    let host = Arc::new(SimHost::new());
    let root = host.root();

    let banner = host.create_element("div");
    host.add_class(banner, "track");
    host.set_attribute(banner, "data-log", "hero-banner");
    host.append_child(root, banner);

    let menu = host.create_element("div");
    host.add_class(menu, "track");
    host.set_attribute(menu, "data-log", "main-menu");
    host.append_child(root, menu);
    let menu_item = host.create_element("span");
    host.append_child(menu, menu_item);

    let modal_close = host.create_element("button");
    host.add_class(modal_close, "track");
    host.add_class(modal_close, "stop");
    host.set_attribute(modal_close, "data-log", "modal-close");
    host.set_stops_propagation(modal_close, true);
    host.append_child(root, modal_close);

    (host, DemoPage { banner, menu_item, modal_close })
}

/// Initialize tracing subscriber with the given log level.
fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
