//! Core engine module - polling loop, write queue and broadcast scheduling

mod clock;
mod engine;
mod event_bus;
mod scheduler;
mod writer;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{CommandError, Engine, EngineCommand, EngineHandle};
pub use event_bus::{EngineEvent, EventBus};
pub use scheduler::BroadcastScheduler;
pub use writer::{PersistenceWriter, RetryPolicy, StoreCommand, WriterHandle};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::analysis::ShiftInfo;
use crate::detection::TrackerPhase;
use crate::input::InputHealth;
use crate::session::SessionState;

/// What the polling loop last saw, published through a `watch` channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStatus {
    pub session: SessionState,
    pub shift: ShiftInfo,
    pub production_date: NaiveDate,
    pub downtime: TrackerPhase,
    pub machine_power: bool,
    pub input: InputHealth,
    pub updated_at: NaiveDateTime,
}

impl LiveStatus {
    pub fn is_downtime(&self) -> bool {
        self.downtime == TrackerPhase::Down
    }
}
