//! Wall-clock source for plant time

use chrono::{Local, NaiveDateTime};
use tokio::time::Instant;

/// Plant-local wall clock. Injected everywhere so that shift logic and
/// timing can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local time of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Wall clock anchored at a fixed instant and advanced by the tokio timer,
/// so it follows `tokio::time::pause`/`advance`
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: NaiveDateTime,
    started: Instant,
}

impl TokioClock {
    pub fn starting_at(base: NaiveDateTime) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> NaiveDateTime {
        let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}
