//! Contact debounce for a single boolean channel

use chrono::{Duration, NaiveDateTime};

/// Accepts a new value only after it has held for the whole window.
///
/// Bounces shorter than the window are absorbed entirely: the stable output
/// never changes, so no edge can be derived from them.
#[derive(Debug, Clone)]
pub struct SignalDebouncer {
    window: Duration,
    stable: bool,
    last_raw: bool,
    changed_at: Option<NaiveDateTime>,
}

impl SignalDebouncer {
    pub fn new(window_ms: u64) -> Self {
        Self::with_initial(window_ms, false)
    }

    /// Start from a known stable level, e.g. the value before a restart
    pub fn with_initial(window_ms: u64, stable: bool) -> Self {
        Self {
            window: Duration::milliseconds(window_ms as i64),
            stable,
            last_raw: stable,
            changed_at: None,
        }
    }

    pub fn stable(&self) -> bool {
        self.stable
    }

    pub fn stabilize(&mut self, raw: bool, now: NaiveDateTime) -> bool {
        if raw != self.last_raw {
            self.last_raw = raw;
            self.changed_at = Some(now);
        }

        if raw != self.stable {
            let since = *self.changed_at.get_or_insert(now);
            if now - since >= self.window {
                self.stable = raw;
            }
        }

        self.stable
    }
}
