//! Attent - user presence and interaction tracking.
//!
//! Two small subsystems over a pluggable host environment: an idle/active
//! detector that watches user input and page visibility, and an interaction
//! tracker that reports clicks, hovers, and viewport exposure of marked
//! elements to a caller-supplied sink.

pub mod bus;
pub mod config;
pub mod host;
pub mod idle;
pub mod logging;
pub mod track;

pub use bus::{EventBus, SubscriberId};
pub use config::Config;
pub use host::{Host, Visibility};
pub use idle::{IdleDetector, IdleStatus};
pub use track::{InteractionTracker, LogEvent, LogRecord, ReportLog};
