// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Shift calendar - maps wall-clock time to the active shift

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

const SECS_PER_DAY: u32 = 24 * 3600;

/// One configured shift. Start is inclusive, end exclusive; a window whose
/// end is not after its start wraps past midnight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftWindow {
    pub id: String,
    pub number: u8,
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub operational: bool,
}

impl ShiftWindow {
    pub fn new(id: &str, number: u8, name: &str, start_hour: u32, end_hour: u32) -> Self {
        Self {
            id: id.to_string(),
            number,
            name: name.to_string(),
            start: NaiveTime::from_hms_opt(start_hour % 24, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(end_hour % 24, 0, 0).unwrap_or(NaiveTime::MIN),
            operational: true,
        }
    }

    fn start_secs(&self) -> u32 {
        self.start.num_seconds_from_midnight()
    }

    fn end_secs(&self) -> u32 {
        self.end.num_seconds_from_midnight()
    }

    fn wraps(&self) -> bool {
        self.end_secs() <= self.start_secs()
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let t = time.num_seconds_from_midnight();
        if self.wraps() {
            t >= self.start_secs() || t < self.end_secs()
        } else {
            t >= self.start_secs() && t < self.end_secs()
        }
    }

    pub fn length_secs(&self) -> u32 {
        if self.wraps() {
            SECS_PER_DAY - self.start_secs() + self.end_secs()
        } else {
            self.end_secs() - self.start_secs()
        }
    }

    /// Non-wrapping `[start, end)` second ranges covered by this window
    fn ranges(&self) -> Vec<(u32, u32)> {
        if self.wraps() {
            vec![(self.start_secs(), SECS_PER_DAY), (0, self.end_secs())]
        } else {
            vec![(self.start_secs(), self.end_secs())]
        }
    }

    fn overlaps(&self, other: &ShiftWindow) -> bool {
        self.ranges().iter().any(|&(a0, a1)| {
            other.ranges().iter().any(|&(b0, b1)| a0 < b1 && b0 < a1)
        })
    }
}

/// Result of a shift lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftInfo {
    pub id: String,
    /// 0 when no shift is active
    pub number: u8,
    pub name: String,
    pub is_operational: bool,
}

impl ShiftInfo {
    pub fn standby() -> Self {
        Self {
            id: "-".to_string(),
            number: 0,
            name: "Standby".to_string(),
            is_operational: false,
        }
    }
}

/// Pure lookup over a validated set of shift windows
#[derive(Debug, Clone)]
pub struct ShiftClock {
    windows: Vec<ShiftWindow>,
}

impl ShiftClock {
    /// Validate and build. Windows must be non-empty, non-overlapping and
    /// have distinct non-zero numbers.
    pub fn new(windows: Vec<ShiftWindow>) -> Result<Self, ConfigError> {
        for (i, w) in windows.iter().enumerate() {
            if w.start == w.end {
                return Err(ConfigError::EmptyShift(w.id.clone()));
            }
            if w.number == 0 {
                return Err(ConfigError::ReservedShiftNumber(w.id.clone()));
            }
            for other in &windows[i + 1..] {
                if w.number == other.number {
                    return Err(ConfigError::DuplicateShiftNumber(w.number));
                }
                if w.overlaps(other) {
                    return Err(ConfigError::OverlappingShifts(w.id.clone(), other.id.clone()));
                }
            }
        }
        Ok(Self { windows })
    }

    pub fn windows(&self) -> &[ShiftWindow] {
        &self.windows
    }

    fn window_at(&self, time: NaiveTime) -> Option<&ShiftWindow> {
        self.windows.iter().find(|w| w.contains(time))
    }

    /// Active shift at `now`; standby when no window covers it
    pub fn current_shift(&self, now: NaiveDateTime) -> ShiftInfo {
        match self.window_at(now.time()) {
            Some(w) => ShiftInfo {
                id: w.id.clone(),
                number: w.number,
                name: w.name.clone(),
                is_operational: w.operational,
            },
            None => ShiftInfo::standby(),
        }
    }

    /// Calendar date a shift's records belong to. A shift that wraps past
    /// midnight stays on the date it started.
    pub fn production_date(&self, now: NaiveDateTime) -> NaiveDate {
        match self.window_at(now.time()) {
            Some(w) if w.wraps() && now.time() < w.end => now.date() - Duration::days(1),
            _ => now.date(),
        }
    }

    /// Planned production time for a shift; zero for standby
    pub fn planned_minutes(&self, shift_number: u8) -> f64 {
        self.windows
            .iter()
            .find(|w| w.number == shift_number && w.operational)
            .map(|w| w.length_secs() as f64 / 60.0)
            .unwrap_or(0.0)
    }

    /// Instant a shift starts for a given production date
    pub fn shift_start(&self, shift_number: u8, production_date: NaiveDate) -> Option<NaiveDateTime> {
        let w = self.windows.iter().find(|w| w.number == shift_number)?;
        Some(production_date.and_time(w.start))
    }

    /// Instant a shift ends for a given production date
    pub fn shift_end(&self, shift_number: u8, production_date: NaiveDate) -> Option<NaiveDateTime> {
        let w = self.windows.iter().find(|w| w.number == shift_number)?;
        let date = if w.wraps() {
            production_date + Duration::days(1)
        } else {
            production_date
        };
        Some(date.and_time(w.end))
    }

    pub fn operational_shift_count(&self) -> usize {
        self.windows.iter().filter(|w| w.operational).count()
    }

    /// Hours of the day covered by operational shifts, starting from the
    /// earliest shift start. Used as trend chart buckets.
    pub fn operational_hours(&self) -> Vec<u32> {
        let operational: Vec<&ShiftWindow> = self.windows.iter().filter(|w| w.operational).collect();
        let Some(first) = operational.iter().map(|w| w.start.hour()).min() else {
            return Vec::new();
        };

        (0..24)
            .map(|offset| (first + offset) % 24)
            .filter(|&h| {
                let time = NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN);
                operational.iter().any(|w| w.contains(time))
            })
            .collect()
    }
}

impl Default for ShiftClock {
    fn default() -> Self {
        Self {
            windows: default_shifts(),
        }
    }
}

/// Morning and afternoon shifts, standby overnight
pub fn default_shifts() -> Vec<ShiftWindow> {
    vec![
        ShiftWindow::new("1", 1, "Pagi", 7, 15),
        ShiftWindow::new("2", 2, "Sore", 15, 23),
    ]
}
