use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Millisecond wall clock that never runs backwards.
///
/// A wall-clock step backwards (NTP adjustment) is clamped to the last value
/// handed out, so stamps on broadcast envelopes are non-decreasing.
#[derive(Debug, Default)]
pub struct ServerClock {
    last: AtomicI64,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in milliseconds since the Unix epoch
    pub fn now(&self) -> i64 {
        self.observe(Utc::now().timestamp_millis())
    }

    fn observe(&self, wall_ms: i64) -> i64 {
        let previous = self.last.fetch_max(wall_ms, Ordering::SeqCst);
        previous.max(wall_ms)
    }
}
