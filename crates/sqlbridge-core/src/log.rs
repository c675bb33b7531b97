//! Debug-mode execution log.
//!
//! When a handle runs with `debug` on, every statement it sends is recorded
//! with its start/finish instants and the call stack that issued it. The log
//! grows for the lifetime of the handle; callers that keep long-lived debug
//! handles should [`ExecutionLog::clear`] it themselves.

use std::backtrace::Backtrace;
use std::time::{Duration, Instant};

/// One executed statement.
#[derive(Debug)]
pub struct LogEntry {
    pub sql: String,
    pub started: Instant,
    /// `None` while the statement is still running
    pub finished: Option<Instant>,
    pub backtrace: Backtrace,
}

impl LogEntry {
    pub fn elapsed(&self) -> Option<Duration> {
        self.finished.map(|f| f.duration_since(self.started))
    }
}

/// Append-only list of executed statements.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a statement about to run and return its index.
    pub fn start(&mut self, sql: &str) -> usize {
        self.entries.push(LogEntry {
            sql: sql.to_string(),
            started: Instant::now(),
            finished: None,
            backtrace: Backtrace::force_capture(),
        });
        self.entries.len() - 1
    }

    pub fn finish(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.finished = Some(Instant::now());
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
