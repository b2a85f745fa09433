use std::time::Duration;

/// Process-wide await settings read from `KAWAIT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwaitConfig {
    /// Default timeout for one await when the object sets none.
    pub timeout: Duration,
    /// Per-subscription channel capacity handed to dynamic sources.
    pub event_buffer: usize,
    /// Wait for generic readiness when an object carries no `waitFor`.
    pub await_all: bool,
}

impl Default for AwaitConfig {
    fn default() -> Self { Self { timeout: Duration::from_secs(600), event_buffer: 16, await_all: false } }
}

impl AwaitConfig {
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let timeout = get("KAWAIT_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(d.timeout);
        let event_buffer = get("KAWAIT_EVENT_BUFFER").and_then(|s| s.parse::<usize>().ok()).unwrap_or(d.event_buffer).max(1);
        let await_all = get("KAWAIT_AWAIT_ALL").map(|s| s.eq_ignore_ascii_case("true") || s == "1").unwrap_or(d.await_all);
        Self { timeout, event_buffer, await_all }
    }
}
