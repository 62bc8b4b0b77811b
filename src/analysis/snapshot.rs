// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Broadcast snapshot - store aggregates plus live status

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::oee::{self, OeeResult, QualityYield};
use super::shift::{ShiftClock, ShiftInfo};
use crate::core::LiveStatus;
use crate::db::{EventStore, StoreError};
use crate::input::InputStatus;

/// Hourly output series for the trend chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    /// "07:00", "08:00", ...
    pub labels: Vec<String>,
    /// Machine gross metres per hour
    pub machine: Vec<f64>,
    /// Tallied good metres per hour
    pub tally: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionSnapshot {
    pub machine_id: u32,
    pub production_date: NaiveDate,
    /// Metres produced in the current shift
    pub actual_m: f64,
    /// Per-shift target; none in standby or when no target is set
    pub target_m: Option<f64>,
    /// Actual against target, percent
    pub efficiency: f64,
    pub joints: u64,
    pub shift: ShiftInfo,
    pub trend: TrendSeries,
    pub is_downtime: bool,
    pub machine_power: bool,
    /// None while in standby
    pub oee: Option<OeeResult>,
    pub input_status: InputStatus,
    /// Counts could not be read; values are from an earlier snapshot
    pub stale: bool,
    pub generated_at: NaiveDateTime,
}

impl ProductionSnapshot {
    fn zeroed(machine_id: u32, live: &LiveStatus, input_status: InputStatus, now: NaiveDateTime) -> Self {
        Self {
            machine_id,
            production_date: live.production_date,
            actual_m: 0.0,
            target_m: None,
            efficiency: 0.0,
            joints: 0,
            shift: live.shift.clone(),
            trend: TrendSeries::default(),
            is_downtime: live.is_downtime(),
            machine_power: live.machine_power,
            oee: None,
            input_status,
            stale: true,
            generated_at: now,
        }
    }
}

/// Builds [`ProductionSnapshot`]s; counts always come from the store
pub struct SnapshotBuilder {
    store: Arc<dyn EventStore>,
    shifts: ShiftClock,
    machine_id: u32,
    default_daily_target: Option<f64>,
    last: Option<ProductionSnapshot>,
}

impl SnapshotBuilder {
    pub fn new(
        store: Arc<dyn EventStore>,
        shifts: ShiftClock,
        machine_id: u32,
        default_daily_target: Option<f64>,
    ) -> Self {
        Self {
            store,
            shifts,
            machine_id,
            default_daily_target,
            last: None,
        }
    }

    pub fn last(&self) -> Option<&ProductionSnapshot> {
        self.last.as_ref()
    }

    /// Never fails: a read error yields the previous snapshot marked stale
    pub fn build(&mut self, live: &LiveStatus, input_status: InputStatus, now: NaiveDateTime) -> ProductionSnapshot {
        match self.aggregate(live, input_status, now) {
            Ok(snapshot) => {
                self.last = Some(snapshot.clone());
                snapshot
            }
            Err(e) => {
                warn!("Snapshot aggregation failed, serving stale data: {}", e);
                match &self.last {
                    Some(prev) => ProductionSnapshot {
                        stale: true,
                        input_status,
                        is_downtime: live.is_downtime(),
                        machine_power: live.machine_power,
                        generated_at: now,
                        ..prev.clone()
                    },
                    None => ProductionSnapshot::zeroed(self.machine_id, live, input_status, now),
                }
            }
        }
    }

    /// Daily target split evenly over operational shifts
    fn shift_target(&self, daily: Option<f64>, shift: &ShiftInfo) -> Option<f64> {
        if !shift.is_operational {
            return None;
        }
        let shifts = self.shifts.operational_shift_count().max(1) as f64;
        daily.map(|t| t / shifts)
    }

    fn trend(&self, date: NaiveDate) -> Result<TrendSeries, StoreError> {
        let machine: HashMap<u32, f64> = self.store.hourly_output(self.machine_id, date)?.into_iter().collect();
        let tally: HashMap<u32, f64> = self.store.hourly_tally(self.machine_id, date)?.into_iter().collect();

        let hours = self.shifts.operational_hours();
        Ok(TrendSeries {
            labels: hours.iter().map(|h| format!("{:02}:00", h)).collect(),
            machine: hours.iter().map(|h| machine.get(h).copied().unwrap_or(0.0)).collect(),
            tally: hours.iter().map(|h| tally.get(h).copied().unwrap_or(0.0)).collect(),
        })
    }

    fn aggregate(
        &self,
        live: &LiveStatus,
        input_status: InputStatus,
        now: NaiveDateTime,
    ) -> Result<ProductionSnapshot, StoreError> {
        let date = live.production_date;
        let shift = &live.shift;

        let shift_totals = self.store.output_totals(self.machine_id, date, Some(shift.number))?;
        let daily_target = self.store.daily_target(date)?.or(self.default_daily_target);
        let target = self.shift_target(daily_target, shift);

        let efficiency = match target {
            Some(t) if t > 0.0 => oee::to_percent(shift_totals.length_m / t),
            _ => 0.0,
        };

        let oee = if shift.is_operational {
            let downtime_secs: i64 = self
                .store
                .downtime_intervals(self.machine_id, date, Some(shift.number))?
                .iter()
                .map(|i| i.elapsed_secs(now))
                .sum();
            let day_gross = self.store.output_totals(self.machine_id, date, None)?.length_m;
            let good = self.store.tally_total(self.machine_id, date)?;

            Some(oee::compute(
                self.shifts.planned_minutes(shift.number),
                downtime_secs as f64 / 60.0,
                shift_totals.length_m,
                target,
                QualityYield::from_outputs(good, day_gross),
            ))
        } else {
            None
        };

        Ok(ProductionSnapshot {
            machine_id: self.machine_id,
            production_date: date,
            actual_m: shift_totals.length_m,
            target_m: target,
            efficiency,
            joints: shift_totals.joints,
            shift: shift.clone(),
            trend: self.trend(date)?,
            is_downtime: live.is_downtime(),
            machine_power: live.machine_power,
            oee,
            input_status,
            stale: false,
            generated_at: now,
        })
    }
}
