//! Per-request buffered logging.
//!
//! Entries are appended to the request context while the request runs and
//! handed to a [`Logger`] exactly once, after every background job of the
//! request has finished.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Default window for grouping adjacent same-severity entries.
pub const DEFAULT_GROUP_WINDOW: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum Severity {
    Print,
    Debug,
    Warning,
    Error,
    Panic,
}

impl Severity {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Print => "",
            Self::Debug => "…",
            Self::Warning => "?",
            Self::Error => "!",
            Self::Panic => "*",
        }
    }
}

/// A single log line, stamped with the time elapsed since the request began.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub elapsed: Duration,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.severity == Severity::Print {
            return f.write_str(&self.message);
        }
        write!(f, "<{}> [{:?}] {}", self.severity.tag(), self.elapsed, self.message)
    }
}

/// Everything a logger gets for one finished request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestReport {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub entries: Vec<LogEntry>,
}

impl RequestReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.severity == severity)
            .count()
    }
}

/// Performs the logging once the request is finished.
///
/// Called exactly once per request. A failing report is logged through
/// `tracing` and otherwise ignored.
pub trait Logger: Send + Sync {
    fn report(&self, report: &RequestReport) -> anyhow::Result<()>;
}

/// Renders entries, grouping adjacent same-severity entries that fall within
/// `window` of each other: those show `+delta` from the previous entry.
pub fn format_entries(entries: &[LogEntry], window: Duration) -> String {
    let mut out = String::new();
    let mut previous: Option<&LogEntry> = None;
    for entry in entries {
        let delta = previous
            .filter(|prev| prev.severity == entry.severity && entry.severity != Severity::Print)
            .map(|prev| entry.elapsed.saturating_sub(prev.elapsed))
            .filter(|delta| *delta <= window);
        match delta {
            Some(delta) => {
                out.push_str(&format!(
                    "<{}> [+{:?}] {}",
                    entry.severity.tag(),
                    delta,
                    entry.message
                ));
            }
            None => out.push_str(&entry.to_string()),
        }
        out.push('\n');
        previous = Some(entry);
    }
    out
}

/// Writes each request's block to a shared stream, one request at a time.
pub struct StdLogger {
    out: Mutex<Box<dyn Write + Send>>,
    group_window: Duration,
}

impl StdLogger {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            group_window: DEFAULT_GROUP_WINDOW,
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn group_window(mut self, window: Duration) -> Self {
        self.group_window = window;
        self
    }
}

impl Default for StdLogger {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Logger for StdLogger {
    fn report(&self, report: &RequestReport) -> anyhow::Result<()> {
        let mut block = format_entries(&report.entries, self.group_window);
        block.push('\n');

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(block.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Ships every entry as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn report(&self, report: &RequestReport) -> anyhow::Result<()> {
        for entry in &report.entries {
            let elapsed_us = entry.elapsed.as_micros() as u64;
            match entry.severity {
                Severity::Print => tracing::info!(
                    method = %report.method, path = %report.path, status = report.status,
                    elapsed_us, "{}", entry.message
                ),
                Severity::Debug => tracing::debug!(
                    method = %report.method, path = %report.path, status = report.status,
                    elapsed_us, "{}", entry.message
                ),
                Severity::Warning => tracing::warn!(
                    method = %report.method, path = %report.path, status = report.status,
                    elapsed_us, "{}", entry.message
                ),
                Severity::Error => tracing::error!(
                    method = %report.method, path = %report.path, status = report.status,
                    elapsed_us, "{}", entry.message
                ),
                Severity::Panic => tracing::error!(
                    method = %report.method, path = %report.path, status = report.status,
                    elapsed_us, panic = true, "{}", entry.message
                ),
            }
        }
        Ok(())
    }
}
