//! Detection module - debounce, joint edge counting and downtime tracking

mod debounce;
mod downtime;
mod edge;

pub use debounce::SignalDebouncer;
pub use downtime::{DowntimeTracker, DowntimeTransition, TrackerPhase};
pub use edge::{EdgeDetector, EdgeOutcome};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One counted joint. Immutable once persisted; `id` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEvent {
    pub id: Uuid,
    pub machine_id: u32,
    pub shift_number: u8,
    pub production_date: NaiveDate,
    pub timestamp: NaiveDateTime,
    /// Metres added by this joint
    pub length_m: f64,
    /// Always 1
    pub joints: u32,
}

impl ProductionEvent {
    pub fn new(
        machine_id: u32,
        shift_number: u8,
        production_date: NaiveDate,
        timestamp: NaiveDateTime,
        length_m: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_id,
            shift_number,
            production_date,
            timestamp,
            length_m,
            joints: 1,
        }
    }
}

/// A confirmed power-off interval. Open while `end` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DowntimeInterval {
    pub id: Uuid,
    pub machine_id: u32,
    pub shift_number: u8,
    pub production_date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub duration_secs: Option<i64>,
}

impl DowntimeInterval {
    pub fn open(machine_id: u32, shift_number: u8, production_date: NaiveDate, start: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_id,
            shift_number,
            production_date,
            start,
            end: None,
            duration_secs: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Close at `end`; never produces a negative duration
    pub fn close(mut self, end: NaiveDateTime) -> Self {
        let end = end.max(self.start);
        self.duration_secs = Some((end - self.start).num_seconds());
        self.end = Some(end);
        self
    }

    /// Seconds elapsed so far; for closed intervals the stored duration
    pub fn elapsed_secs(&self, now: NaiveDateTime) -> i64 {
        match self.duration_secs {
            Some(d) => d,
            None => (now - self.start).num_seconds().max(0),
        }
    }
}
