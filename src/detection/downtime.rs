// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Power-off downtime state machine
//!
//! `Up -> Pending -> Down -> Up`. A candidate becomes a persisted interval
//! only after power has stayed off for the minimum duration; shorter blips
//! leave no record. Outside operational windows nothing is tracked.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::DowntimeInterval;
use crate::analysis::{ShiftClock, ShiftInfo};

/// Externally visible tracker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerPhase {
    Up,
    Pending,
    Down,
}

/// A change the caller must persist, in order
#[derive(Debug, Clone, PartialEq)]
pub enum DowntimeTransition {
    /// Threshold crossed; persist with `end = None`
    Opened(DowntimeInterval),
    /// Power back, shift change or window left; persist the update
    Closed(DowntimeInterval),
    /// Power came back before the threshold
    Discarded { since: NaiveDateTime, lasted_secs: i64 },
}

#[derive(Debug, Clone)]
enum Phase {
    Up,
    Pending {
        since: NaiveDateTime,
        shift_number: u8,
        production_date: NaiveDate,
    },
    Down {
        interval: DowntimeInterval,
    },
}

#[derive(Debug, Clone)]
pub struct DowntimeTracker {
    machine_id: u32,
    min_downtime: Duration,
    shifts: ShiftClock,
    phase: Phase,
}

impl DowntimeTracker {
    pub fn new(machine_id: u32, min_downtime_secs: u64, shifts: ShiftClock) -> Self {
        Self {
            machine_id,
            min_downtime: Duration::seconds(min_downtime_secs as i64),
            shifts,
            phase: Phase::Up,
        }
    }

    /// Where `interval` stops counting against its own shift: the shift end
    /// if that already passed, otherwise `now`
    fn cut_point(&self, interval: &DowntimeInterval, now: NaiveDateTime) -> NaiveDateTime {
        self.shifts
            .shift_end(interval.shift_number, interval.production_date)
            .map_or(now, |end| end.min(now))
            .max(interval.start)
    }

    pub fn phase(&self) -> TrackerPhase {
        match self.phase {
            Phase::Up => TrackerPhase::Up,
            Phase::Pending { .. } => TrackerPhase::Pending,
            Phase::Down { .. } => TrackerPhase::Down,
        }
    }

    pub fn open_interval(&self) -> Option<&DowntimeInterval> {
        match &self.phase {
            Phase::Down { interval } => Some(interval),
            _ => None,
        }
    }

    pub fn open_id(&self) -> Option<Uuid> {
        self.open_interval().map(|i| i.id)
    }

    /// Resume from an interval that was still open when the process stopped
    pub fn restore(&mut self, interval: DowntimeInterval) {
        if interval.is_open() {
            info!(id = %interval.id, start = %interval.start, "Restored open downtime interval");
            self.phase = Phase::Down { interval };
        }
    }

    /// Rebase after the day's rows were deleted. An open interval is
    /// replaced by a fresh one starting at `now`, which must be persisted.
    pub fn restart_at(&mut self, now: NaiveDateTime) -> Option<DowntimeTransition> {
        match &mut self.phase {
            Phase::Up => None,
            Phase::Pending { since, .. } => {
                *since = now;
                None
            }
            Phase::Down { interval } => {
                let fresh =
                    DowntimeInterval::open(self.machine_id, interval.shift_number, interval.production_date, now);
                *interval = fresh.clone();
                Some(DowntimeTransition::Opened(fresh))
            }
        }
    }

    /// Advance on one power sample
    pub fn on_power(
        &mut self,
        power_on: bool,
        shift: &ShiftInfo,
        production_date: NaiveDate,
        now: NaiveDateTime,
    ) -> Vec<DowntimeTransition> {
        let mut out = Vec::new();

        if !shift.is_operational || power_on {
            match std::mem::replace(&mut self.phase, Phase::Up) {
                Phase::Up => {}
                Phase::Pending { since, .. } => {
                    let lasted_secs = (now - since).num_seconds();
                    debug!(lasted_secs, "Power blip below downtime threshold");
                    out.push(DowntimeTransition::Discarded { since, lasted_secs });
                }
                Phase::Down { interval } => {
                    let end = self.cut_point(&interval, now);
                    let closed = interval.close(end);
                    info!(
                        id = %closed.id,
                        duration_secs = closed.duration_secs.unwrap_or(0),
                        "Downtime closed"
                    );
                    out.push(DowntimeTransition::Closed(closed));
                }
            }
            return out;
        }

        if let Phase::Up = self.phase {
            self.phase = Phase::Pending {
                since: now,
                shift_number: shift.number,
                production_date,
            };
        }

        if let Phase::Pending {
            since,
            shift_number,
            production_date: pending_date,
        } = self.phase
        {
            if now - since >= self.min_downtime {
                let interval = DowntimeInterval::open(self.machine_id, shift_number, pending_date, since);
                info!(id = %interval.id, start = %since, "Downtime opened");
                out.push(DowntimeTransition::Opened(interval.clone()));
                self.phase = Phase::Down { interval };
            }
        }

        let split = match &self.phase {
            Phase::Down { interval }
                if interval.shift_number != shift.number || interval.production_date != production_date =>
            {
                let end = self.cut_point(interval, now);
                // A gap between windows is standby, not downtime
                let start = self
                    .shifts
                    .shift_start(shift.number, production_date)
                    .map_or(end, |start| start.max(end))
                    .min(now);
                Some((interval.clone().close(end), start))
            }
            _ => None,
        };

        if let Some((closed, start)) = split {
            let next = DowntimeInterval::open(self.machine_id, shift.number, production_date, start);
            info!(
                from = closed.shift_number,
                to = next.shift_number,
                at = %start,
                "Downtime split at shift change"
            );
            out.push(DowntimeTransition::Closed(closed));
            out.push(DowntimeTransition::Opened(next.clone()));
            self.phase = Phase::Down { interval: next };
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn t(hour: u32, min: u32, sec: u32) -> NaiveDateTime {
        day().and_hms_opt(hour, min, sec).unwrap()
    }

    fn shift(number: u8) -> ShiftInfo {
        match number {
            0 => ShiftInfo::standby(),
            n => ShiftInfo {
                id: n.to_string(),
                number: n,
                name: format!("Shift {}", n),
                is_operational: true,
            },
        }
    }

    /// Drive one sample per second from `from` for `secs` seconds
    fn drive(
        tracker: &mut DowntimeTracker,
        power_on: bool,
        from: NaiveDateTime,
        secs: i64,
        shift_number: u8,
    ) -> Vec<DowntimeTransition> {
        (0..=secs)
            .flat_map(|s| tracker.on_power(power_on, &shift(shift_number), day(), from + Duration::seconds(s)))
            .collect()
    }

    #[test]
    fn test_blip_below_threshold_leaves_no_record() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        let off = drive(&mut tracker, false, t(8, 0, 0), 59, 1);
        assert!(off.is_empty());
        assert_eq!(tracker.phase(), TrackerPhase::Pending);

        let on = tracker.on_power(true, &shift(1), day(), t(8, 0, 59));
        assert!(matches!(on.as_slice(), [DowntimeTransition::Discarded { lasted_secs: 59, .. }]));
        assert_eq!(tracker.phase(), TrackerPhase::Up);
    }

    #[test]
    fn test_outage_records_one_interval() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        let off = drive(&mut tracker, false, t(8, 0, 0), 300, 1);
        assert_eq!(off.len(), 1);
        let opened = match &off[0] {
            DowntimeTransition::Opened(i) => i.clone(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(opened.start, t(8, 0, 0));
        assert!(opened.is_open());
        assert_eq!(tracker.open_id(), Some(opened.id));

        let on = tracker.on_power(true, &shift(1), day(), t(8, 5, 0));
        match on.as_slice() {
            [DowntimeTransition::Closed(closed)] => {
                assert_eq!(closed.id, opened.id);
                assert_eq!(closed.end, Some(t(8, 5, 0)));
                assert_eq!(closed.duration_secs, Some(300));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tracker.phase(), TrackerPhase::Up);
    }

    #[test]
    fn test_exactly_at_threshold_opens() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        assert!(tracker.on_power(false, &shift(1), day(), t(8, 0, 0)).is_empty());
        let out = tracker.on_power(false, &shift(1), day(), t(8, 1, 0));
        assert!(matches!(out.as_slice(), [DowntimeTransition::Opened(_)]));
    }

    #[test]
    fn test_split_at_shift_change() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        drive(&mut tracker, false, t(14, 50, 0), 60, 1);
        let first = tracker.open_id().unwrap();

        let out = tracker.on_power(false, &shift(2), day(), t(15, 0, 0));
        match out.as_slice() {
            [DowntimeTransition::Closed(closed), DowntimeTransition::Opened(next)] => {
                assert_eq!(closed.id, first);
                assert_eq!(closed.shift_number, 1);
                assert_eq!(closed.duration_secs, Some(600));
                assert_eq!(next.shift_number, 2);
                assert_eq!(next.start, t(15, 0, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tracker.phase(), TrackerPhase::Down);
    }

    #[test]
    fn test_candidate_straddling_shift_change_is_split_at_boundary() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        assert!(drive(&mut tracker, false, t(14, 59, 30), 29, 1).is_empty());
        assert!(drive(&mut tracker, false, t(15, 0, 0), 29, 2).is_empty());
        assert_eq!(tracker.phase(), TrackerPhase::Pending);

        // Confirmed only after the change; shift 1 keeps its own 30 s
        let out = tracker.on_power(false, &shift(2), day(), t(15, 0, 30));
        match out.as_slice() {
            [DowntimeTransition::Opened(first), DowntimeTransition::Closed(closed), DowntimeTransition::Opened(next)] => {
                assert_eq!(first.id, closed.id);
                assert_eq!(closed.shift_number, 1);
                assert_eq!(closed.start, t(14, 59, 30));
                assert_eq!(closed.end, Some(t(15, 0, 0)));
                assert_eq!(closed.duration_secs, Some(30));
                assert_eq!(next.shift_number, 2);
                assert_eq!(next.start, t(15, 0, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tracker.open_interval().map(|i| i.start), Some(t(15, 0, 0)));
    }

    #[test]
    fn test_late_split_is_cut_at_boundary() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        drive(&mut tracker, false, t(14, 50, 0), 60, 1);

        // First sample of shift 2 arrives late
        let out = tracker.on_power(false, &shift(2), day(), t(15, 0, 4));
        match out.as_slice() {
            [DowntimeTransition::Closed(closed), DowntimeTransition::Opened(next)] => {
                assert_eq!(closed.end, Some(t(15, 0, 0)));
                assert_eq!(next.start, t(15, 0, 0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_standby_is_ignored() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        let out = drive(&mut tracker, false, t(23, 10, 0), 600, 0);
        assert!(out.is_empty());
        assert_eq!(tracker.phase(), TrackerPhase::Up);
    }

    #[test]
    fn test_leaving_window_closes_interval() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        drive(&mut tracker, false, t(22, 50, 0), 120, 2);
        assert_eq!(tracker.phase(), TrackerPhase::Down);

        let out = tracker.on_power(false, &shift(0), day(), t(23, 0, 2));
        match out.as_slice() {
            [DowntimeTransition::Closed(closed)] => assert_eq!(closed.end, Some(t(23, 0, 0))),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tracker.phase(), TrackerPhase::Up);
    }

    #[test]
    fn test_restore_and_restart() {
        let mut tracker = DowntimeTracker::new(1, 60, ShiftClock::default());
        let open = DowntimeInterval::open(1, 1, day(), t(9, 0, 0));
        tracker.restore(open.clone());
        assert_eq!(tracker.open_id(), Some(open.id));

        match tracker.restart_at(t(9, 30, 0)) {
            Some(DowntimeTransition::Opened(fresh)) => {
                assert_ne!(fresh.id, open.id);
                assert_eq!(fresh.start, t(9, 30, 0));
            }
            other => panic!("unexpected {:?}", other),
        }

        let closed = open.close(t(9, 10, 0));
        let mut up = DowntimeTracker::new(1, 60, ShiftClock::default());
        up.restore(closed);
        assert_eq!(up.phase(), TrackerPhase::Up);
    }
}
