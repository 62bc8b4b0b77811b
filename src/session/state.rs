//! In-memory session counters

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::ProductionEvent;

/// Cache of what the event log says about the current shift.
///
/// Never the source of truth: whenever it may have drifted it is rebuilt
/// from persisted events with [`SessionState::from_events`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub production_date: Option<NaiveDate>,
    pub shift_number: u8,
    pub total_length_m: f64,
    pub total_joints: u64,
    pub last_sensor: bool,
    pub last_power: bool,
    pub open_downtime_id: Option<Uuid>,
    pub last_event_at: Option<NaiveDateTime>,
}

impl SessionState {
    pub fn for_period(production_date: NaiveDate, shift_number: u8) -> Self {
        Self {
            production_date: Some(production_date),
            shift_number,
            ..Default::default()
        }
    }

    /// Sum the events that belong to `(production_date, shift_number)`
    pub fn from_events(production_date: NaiveDate, shift_number: u8, events: &[ProductionEvent]) -> Self {
        let mut state = Self::for_period(production_date, shift_number);
        for event in events
            .iter()
            .filter(|e| e.production_date == production_date && e.shift_number == shift_number)
        {
            state.apply(event);
        }
        state
    }

    pub fn apply(&mut self, event: &ProductionEvent) {
        self.total_length_m += event.length_m;
        self.total_joints += event.joints as u64;
        self.last_event_at = Some(match self.last_event_at {
            Some(prev) => prev.max(event.timestamp),
            None => event.timestamp,
        });
    }

    pub fn belongs_to(&self, production_date: NaiveDate, shift_number: u8) -> bool {
        self.production_date == Some(production_date) && self.shift_number == shift_number
    }

    /// Keep the live signal levels from `self`, take everything derived from
    /// the log from `rebuilt`. The last accepted event is the later of the
    /// two, so the re-trigger guard holds across shift changes.
    pub fn merge_live(&self, rebuilt: SessionState) -> SessionState {
        SessionState {
            last_sensor: self.last_sensor,
            last_power: self.last_power,
            last_event_at: self.last_event_at.max(rebuilt.last_event_at),
            ..rebuilt
        }
    }

    /// Zeroed counters for the same period, keeping live levels and the
    /// re-trigger guard
    pub fn after_reset(&self) -> SessionState {
        SessionState {
            last_sensor: self.last_sensor,
            last_power: self.last_power,
            last_event_at: self.last_event_at,
            production_date: self.production_date,
            shift_number: self.shift_number,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_from_events_filters_period() {
        let ts = day().and_hms_opt(8, 0, 0).unwrap();
        let events = vec![
            ProductionEvent::new(1, 1, day(), ts, 1.2),
            ProductionEvent::new(1, 1, day(), ts + chrono::Duration::seconds(5), 1.2),
            ProductionEvent::new(1, 2, day(), ts, 1.2),
            ProductionEvent::new(1, 1, day().succ_opt().unwrap(), ts, 1.2),
        ];

        let state = SessionState::from_events(day(), 1, &events);
        assert_eq!(state.total_joints, 2);
        assert!((state.total_length_m - 2.4).abs() < 1e-9);
        assert_eq!(state.last_event_at, Some(ts + chrono::Duration::seconds(5)));
        assert!(state.belongs_to(day(), 1));
        assert!(!state.belongs_to(day(), 2));
    }

    #[test]
    fn test_merge_keeps_latest_event_time() {
        let ts = day().and_hms_opt(14, 59, 59).unwrap();
        let live = SessionState {
            last_sensor: true,
            last_event_at: Some(ts),
            total_joints: 9,
            ..SessionState::for_period(day(), 1)
        };

        let next_shift = live.merge_live(SessionState::for_period(day(), 2));
        assert_eq!(next_shift.shift_number, 2);
        assert_eq!(next_shift.total_joints, 0);
        assert!(next_shift.last_sensor);
        assert_eq!(next_shift.last_event_at, Some(ts));

        let later = ts + chrono::Duration::seconds(30);
        let rebuilt = SessionState::from_events(day(), 2, &[ProductionEvent::new(1, 2, day(), later, 1.2)]);
        assert_eq!(next_shift.merge_live(rebuilt).last_event_at, Some(later));
    }
}
