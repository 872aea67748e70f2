//! Interaction tracking: click, hover, and viewport-exposure reporting for
//! marked elements.
//!
//! Elements are marked with a selector class (default `.track`) and carry
//! their payload in a data attribute (default `data-log`). Qualifying
//! interactions produce a [`LogRecord`] handed to the caller-supplied
//! [`ReportLog`] sink; the sink is the only way records leave the tracker.

mod exposure;
mod throttle;
mod tracker;

pub use throttle::Throttle;
pub use tracker::InteractionTracker;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Interaction kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEvent {
    Click,
    Hover,
    Exposure,
}

/// One reported interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub event: LogEvent,
    /// Value of the log attribute on the reported element at event time;
    /// `None` when the attribute is absent.
    pub data: Option<String>,
}

/// Caller-supplied sink for log records.
///
/// Invoked synchronously, once per qualifying interaction. Its return value
/// is ignored and it must not panic; failure handling is the caller's
/// responsibility.
pub type ReportLog = Arc<dyn Fn(LogRecord) + Send + Sync>;
