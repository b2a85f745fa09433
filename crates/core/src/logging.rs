//! User-facing progress messages emitted while awaiting.
//!
//! These are informational only and never affect control flow. The default
//! sink forwards to `tracing`; hosts can plug in their own.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

pub trait Logger: Send + Sync {
    /// Durable message.
    fn log(&self, sev: Severity, msg: &str);
    /// Transient status line, superseded by the next one.
    fn log_status(&self, sev: Severity, msg: &str);
}

/// Forwards messages to `tracing` at the matching level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    fn emit(sev: Severity, msg: &str, status: bool) {
        match sev {
            Severity::Debug => debug!(status, "{}", msg),
            Severity::Info => info!(status, "{}", msg),
            Severity::Warning => warn!(status, "{}", msg),
            Severity::Error => error!(status, "{}", msg),
        }
    }
}

impl Logger for TracingLogger {
    fn log(&self, sev: Severity, msg: &str) { Self::emit(sev, msg, false) }
    fn log_status(&self, sev: Severity, msg: &str) { Self::emit(sev, msg, true) }
}

/// Drops a status message when it repeats the previous one verbatim. Event
/// streams re-evaluate readiness on every change, which otherwise floods the
/// status line with identical text.
pub struct DedupLogger {
    inner: Arc<dyn Logger>,
    last: Mutex<Option<(Severity, String)>>,
}

impl DedupLogger {
    pub fn new(inner: Arc<dyn Logger>) -> Self { Self { inner, last: Mutex::new(None) } }
}

impl Logger for DedupLogger {
    fn log(&self, sev: Severity, msg: &str) { self.inner.log(sev, msg) }

    fn log_status(&self, sev: Severity, msg: &str) {
        {
            let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
            if matches!(last.as_ref(), Some((s, m)) if *s == sev && m == msg) {
                return;
            }
            *last = Some((sev, msg.to_string()));
        }
        self.inner.log_status(sev, msg)
    }
}

/// Records every message as `"<severity>: <message>"` lines.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogger {
    pub fn new() -> Self { Self::default() }

    pub fn lines(&self) -> Vec<String> { self.lines.lock().unwrap_or_else(|p| p.into_inner()).clone() }

    pub fn contents(&self) -> String { self.lines().join("\n") }

    pub fn contains(&self, needle: &str) -> bool { self.lines().iter().any(|l| l.contains(needle)) }

    fn push(&self, sev: Severity, msg: &str) {
        self.lines.lock().unwrap_or_else(|p| p.into_inner()).push(format!("{}: {}", sev, msg));
    }
}

impl Logger for MemoryLogger {
    fn log(&self, sev: Severity, msg: &str) { self.push(sev, msg) }
    fn log_status(&self, sev: Severity, msg: &str) { self.push(sev, msg) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_suppresses_consecutive_repeats_only() {
        let mem = Arc::new(MemoryLogger::new());
        let dedup = DedupLogger::new(mem.clone());
        dedup.log_status(Severity::Info, "waiting");
        dedup.log_status(Severity::Info, "waiting");
        dedup.log_status(Severity::Warning, "waiting");
        dedup.log_status(Severity::Info, "done");
        dedup.log_status(Severity::Info, "waiting");
        dedup.log(Severity::Info, "x");
        dedup.log(Severity::Info, "x");
        assert_eq!(
            mem.lines(),
            vec!["info: waiting", "warning: waiting", "info: done", "info: waiting", "info: x", "info: x"]
        );
    }
}
