//! Structured activity logging for compliance runs.

pub mod jsonl;

pub use self::jsonl::{EventType, JsonlConfig, JsonlWriter, Level, LogEntry};
