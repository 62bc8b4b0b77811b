// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Event bus for inter-component communication

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::db::DeletedRows;
use crate::detection::{DowntimeInterval, ProductionEvent};
use crate::input::InputStatus;

/// Something that has already happened. Store-backed variants are only
/// published after the write committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ProductionCommitted(ProductionEvent),
    DowntimeCommitted(DowntimeInterval),
    TallyCommitted { date: NaiveDate, hour: u32, meters: f64 },
    ResetCompleted(DeletedRows),
    InputStatusChanged { status: InputStatus },
    /// A write was given up; `payload` is the JSON needed to replay it
    PersistenceFailed { what: String, payload: String, error: String },
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    event_tx: broadcast::Sender<EngineEvent>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);

        Self {
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: EngineEvent) {
        self.event_counter.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Events published since start
    pub fn published(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
