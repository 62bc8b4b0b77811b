//! Fault-injecting store for tests

use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::{Database, DeletedRows, EventStore, OutputTotals, StoreError};
use crate::detection::{DowntimeInterval, ProductionEvent};

/// In-memory database that fails the next `insert_failures` event inserts,
/// every read while `fail_reads` is set and every tally while `fail_tally` is
pub struct FaultyStore {
    pub inner: Database,
    pub insert_failures: AtomicU32,
    pub fail_reads: AtomicBool,
    pub fail_tally: AtomicBool,
}

impl FaultyStore {
    pub fn new(insert_failures: u32) -> Self {
        Self {
            inner: Database::open_in_memory().unwrap(),
            insert_failures: AtomicU32::new(insert_failures),
            fail_reads: AtomicBool::new(false),
            fail_tally: AtomicBool::new(false),
        }
    }

    fn read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Corrupt("simulated read failure".into()))
        } else {
            Ok(())
        }
    }
}

impl EventStore for FaultyStore {
    fn insert_event(&self, event: &ProductionEvent) -> Result<bool, StoreError> {
        let failing = self
            .insert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Corrupt("simulated write failure".into()));
        }
        self.inner.insert_event(event)
    }

    fn upsert_downtime(&self, interval: &DowntimeInterval) -> Result<(), StoreError> {
        self.inner.upsert_downtime(interval)
    }

    fn output_totals(&self, machine_id: u32, date: NaiveDate, shift: Option<u8>) -> Result<OutputTotals, StoreError> {
        self.read()?;
        self.inner.output_totals(machine_id, date, shift)
    }

    fn events(&self, machine_id: u32, date: NaiveDate, shift: Option<u8>) -> Result<Vec<ProductionEvent>, StoreError> {
        self.read()?;
        self.inner.events(machine_id, date, shift)
    }

    fn hourly_output(&self, machine_id: u32, date: NaiveDate) -> Result<Vec<(u32, f64)>, StoreError> {
        self.read()?;
        self.inner.hourly_output(machine_id, date)
    }

    fn downtime_intervals(
        &self,
        machine_id: u32,
        date: NaiveDate,
        shift: Option<u8>,
    ) -> Result<Vec<DowntimeInterval>, StoreError> {
        self.read()?;
        self.inner.downtime_intervals(machine_id, date, shift)
    }

    fn open_downtime(&self, machine_id: u32) -> Result<Option<DowntimeInterval>, StoreError> {
        self.read()?;
        self.inner.open_downtime(machine_id)
    }

    fn upsert_tally(&self, machine_id: u32, date: NaiveDate, hour: u32, meters: f64) -> Result<(), StoreError> {
        if self.fail_tally.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("simulated tally failure".into()));
        }
        self.inner.upsert_tally(machine_id, date, hour, meters)
    }

    fn hourly_tally(&self, machine_id: u32, date: NaiveDate) -> Result<Vec<(u32, f64)>, StoreError> {
        self.read()?;
        self.inner.hourly_tally(machine_id, date)
    }

    fn tally_total(&self, machine_id: u32, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        self.read()?;
        self.inner.tally_total(machine_id, date)
    }

    fn daily_target(&self, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        self.read()?;
        self.inner.daily_target(date)
    }

    fn set_daily_target(&self, date: NaiveDate, meters: f64) -> Result<(), StoreError> {
        self.inner.set_daily_target(date, meters)
    }

    fn delete_day(&self, machine_id: u32, date: NaiveDate) -> Result<DeletedRows, StoreError> {
        self.inner.delete_day(machine_id, date)
    }
}
