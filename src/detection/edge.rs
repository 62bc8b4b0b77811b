// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Rising-edge joint counter

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use super::ProductionEvent;
use crate::analysis::ShiftInfo;
use crate::session::SessionState;

/// What one frame did to the counter
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeOutcome {
    /// No rising edge
    Idle,
    /// Rising edge while the machine was unpowered
    PowerOff,
    /// Rising edge inside the re-trigger interval; dropped, not queued
    Ignored { since_last_ms: i64 },
    /// A joint was counted
    Counted(ProductionEvent),
}

/// Turns debounced sensor levels into [`ProductionEvent`]s
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    machine_id: u32,
    length_per_joint_m: f64,
    min_retrigger: Duration,
}

impl EdgeDetector {
    pub fn new(machine_id: u32, length_per_joint_m: f64, min_retrigger_ms: u64) -> Self {
        Self {
            machine_id,
            length_per_joint_m,
            min_retrigger: Duration::milliseconds(min_retrigger_ms as i64),
        }
    }

    /// Feed one debounced frame. Counters in `state` are updated before the
    /// event is handed back for persistence.
    pub fn on_frame(
        &self,
        state: &mut SessionState,
        stable_sensor: bool,
        power_on: bool,
        shift: &ShiftInfo,
        production_date: NaiveDate,
        now: NaiveDateTime,
    ) -> EdgeOutcome {
        let rising = stable_sensor && !state.last_sensor;
        state.last_sensor = stable_sensor;
        state.last_power = power_on;

        if !rising {
            return EdgeOutcome::Idle;
        }
        if !power_on {
            debug!("Joint edge ignored: machine power off");
            return EdgeOutcome::PowerOff;
        }

        if let Some(last) = state.last_event_at {
            let since = now - last;
            if since < self.min_retrigger {
                debug!(
                    since_last_ms = since.num_milliseconds(),
                    "Joint edge ignored: inside re-trigger interval"
                );
                return EdgeOutcome::Ignored {
                    since_last_ms: since.num_milliseconds(),
                };
            }
        }

        let event = ProductionEvent::new(
            self.machine_id,
            shift.number,
            production_date,
            now,
            self.length_per_joint_m,
        );
        state.apply(&event);
        EdgeOutcome::Counted(event)
    }
}
