//! JSONL writer for interaction records and session events.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::track::{LogEvent, LogRecord, ReportLog};

/// Log entry for a reported interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackLogEntry {
    /// Report timestamp.
    pub timestamp: DateTime<Utc>,
    /// Interaction kind.
    pub event: LogEvent,
    /// Payload read from the element's log attribute, if present.
    pub data: Option<String>,
}

/// Session event types for JSONL logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    #[serde(rename = "session_start")]
    SessionStart {
        timestamp: DateTime<Utc>,
        version: String,
    },
    #[serde(rename = "session_end")]
    SessionEnd {
        timestamp: DateTime<Utc>,
        records_logged: u64,
    },
    #[serde(rename = "idle_start")]
    IdleStart {
        timestamp: DateTime<Utc>,
        idle_after_seconds: u64,
    },
    #[serde(rename = "idle_end")]
    IdleEnd {
        timestamp: DateTime<Utc>,
        idle_duration_seconds: u64,
    },
}

/// JSONL logger with daily file rotation.
pub struct JsonlLogger {
    logs_dir: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
    idle_start_time: Option<DateTime<Utc>>,
}

impl JsonlLogger {
    /// Create a new JSONL logger.
    pub fn new(logs_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        Ok(Self {
            logs_dir,
            current_file: None,
            current_date: None,
            idle_start_time: None,
        })
    }

    /// Get or create the log file for today.
    fn get_writer(&mut self) -> Result<&mut BufWriter<File>> {
        let today = Local::now().format("%Y-%m-%d").to_string();

        // Check if we need to rotate to a new file
        if self.current_date.as_ref() != Some(&today) {
            let log_path = self.logs_dir.join(format!("{}.jsonl", today));

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

            self.current_file = Some(BufWriter::new(file));
            self.current_date = Some(today.clone());

            debug!("Opened log file: {:?}", log_path);
        }

        self.current_file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No log file available"))
    }

    /// Write a line to the JSONL log.
    fn write_line<T: Serialize>(&mut self, entry: &T) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let writer = self.get_writer()?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    /// Log a reported interaction.
    pub fn log_record(&mut self, record: &LogRecord) -> Result<()> {
        let entry = TrackLogEntry {
            timestamp: Utc::now(),
            event: record.event,
            data: record.data.clone(),
        };
        self.write_line(&entry)
    }

    /// Log session start event.
    pub fn log_session_start(&mut self, version: &str) -> Result<()> {
        let event = SessionEvent::SessionStart {
            timestamp: Utc::now(),
            version: version.to_string(),
        };
        info!("Session started");
        self.write_line(&event)
    }

    /// Log session end event.
    pub fn log_session_end(&mut self, records_logged: u64) -> Result<()> {
        let event = SessionEvent::SessionEnd {
            timestamp: Utc::now(),
            records_logged,
        };
        info!("Session ended, {} records logged", records_logged);
        self.write_line(&event)
    }

    /// Log idle start event.
    pub fn log_idle_start(&mut self, idle_after_seconds: u64) -> Result<()> {
        self.idle_start_time = Some(Utc::now());
        let event = SessionEvent::IdleStart {
            timestamp: Utc::now(),
            idle_after_seconds,
        };
        self.write_line(&event)
    }

    /// Log idle end event.
    pub fn log_idle_end(&mut self) -> Result<()> {
        let idle_duration = self
            .idle_start_time
            .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
            .unwrap_or(0);

        self.idle_start_time = None;

        let event = SessionEvent::IdleEnd {
            timestamp: Utc::now(),
            idle_duration_seconds: idle_duration,
        };
        self.write_line(&event)
    }

    /// Get the current idle start time.
    pub fn idle_start_time(&self) -> Option<DateTime<Utc>> {
        self.idle_start_time
    }

    /// Adapt a shared logger into a tracker report sink.
    ///
    /// Write failures are logged and swallowed; the sink must not panic
    /// into the tracker's event handlers.
    pub fn reporter(logger: Arc<Mutex<JsonlLogger>>) -> ReportLog {
        Arc::new(move |record| {
            if let Err(e) = logger.lock().unwrap().log_record(&record) {
                warn!("Failed to write log record: {}", e);
            }
        })
    }
}

impl Drop for JsonlLogger {
    fn drop(&mut self) {
        // Flush any remaining data
        if let Some(ref mut writer) = self.current_file {
            let _ = writer.flush();
        }
    }
}
