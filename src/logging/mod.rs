//! JSONL report sink and session bookkeeping.

mod jsonl;

pub use jsonl::{JsonlLogger, SessionEvent, TrackLogEntry};
