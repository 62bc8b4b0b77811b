// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Database module - append/query store for production and downtime records

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::detection::{DowntimeInterval, ProductionEvent};

#[cfg(test)]
pub(crate) mod testing;

const DATE_FMT: &str = "%Y-%m-%d";
const TS_FMT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("write queue is full")]
    QueueFull,

    #[error("persistence writer has stopped")]
    WriterClosed,

    #[error("write given up after retries: {0}")]
    GaveUp(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output summed over a set of production rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputTotals {
    pub length_m: f64,
    pub joints: u64,
}

/// Rows removed by [`EventStore::delete_day`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRows {
    pub production: usize,
    pub downtime: usize,
    pub tally: usize,
}

/// Generic append/query store. Every write is idempotent so that a retry
/// after an ambiguous failure cannot double count.
pub trait EventStore: Send + Sync {
    /// Returns false when the event id was already stored
    fn insert_event(&self, event: &ProductionEvent) -> Result<bool, StoreError>;

    /// Insert or replace by interval id
    fn upsert_downtime(&self, interval: &DowntimeInterval) -> Result<(), StoreError>;

    fn output_totals(&self, machine_id: u32, date: NaiveDate, shift: Option<u8>) -> Result<OutputTotals, StoreError>;

    /// Events in detection order
    fn events(&self, machine_id: u32, date: NaiveDate, shift: Option<u8>) -> Result<Vec<ProductionEvent>, StoreError>;

    /// `(hour, metres)` for every hour with output
    fn hourly_output(&self, machine_id: u32, date: NaiveDate) -> Result<Vec<(u32, f64)>, StoreError>;

    fn downtime_intervals(
        &self,
        machine_id: u32,
        date: NaiveDate,
        shift: Option<u8>,
    ) -> Result<Vec<DowntimeInterval>, StoreError>;

    /// The interval still open for a machine, if any
    fn open_downtime(&self, machine_id: u32) -> Result<Option<DowntimeInterval>, StoreError>;

    fn upsert_tally(&self, machine_id: u32, date: NaiveDate, hour: u32, meters: f64) -> Result<(), StoreError>;

    fn hourly_tally(&self, machine_id: u32, date: NaiveDate) -> Result<Vec<(u32, f64)>, StoreError>;

    /// None when nothing has been tallied for the date
    fn tally_total(&self, machine_id: u32, date: NaiveDate) -> Result<Option<f64>, StoreError>;

    /// Target in effect on `date`: the latest one set on or before it
    fn daily_target(&self, date: NaiveDate) -> Result<Option<f64>, StoreError>;

    fn set_daily_target(&self, date: NaiveDate, meters: f64) -> Result<(), StoreError>;

    /// Remove all production, downtime and tally rows of one day, atomically
    fn delete_day(&self, machine_id: u32, date: NaiveDate) -> Result<DeletedRows, StoreError>;
}

/// SQLite-backed store
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let db = Self::with_connection(conn)?;
        info!("Database opened at {:?}", path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS production_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                machine_id INTEGER NOT NULL,
                shift_number INTEGER NOT NULL,
                production_date TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                length_m REAL NOT NULL,
                joints INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_production_day
                ON production_logs(machine_id, production_date, shift_number);

            CREATE TABLE IF NOT EXISTS downtime_logs (
                id TEXT PRIMARY KEY,
                machine_id INTEGER NOT NULL,
                shift_number INTEGER NOT NULL,
                production_date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_secs INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_downtime_day
                ON downtime_logs(machine_id, production_date, shift_number);

            CREATE TABLE IF NOT EXISTS tally_logs (
                machine_id INTEGER NOT NULL,
                production_date TEXT NOT NULL,
                hour INTEGER NOT NULL,
                meters REAL NOT NULL,
                PRIMARY KEY (machine_id, production_date, hour)
            );

            CREATE TABLE IF NOT EXISTS production_targets (
                effective_date TEXT PRIMARY KEY,
                target_m REAL NOT NULL
            );
        "#,
        )?;

        Ok(())
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format(TS_FMT).to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FMT).map_err(|e| StoreError::Corrupt(format!("date '{}': {}", s, e)))
}

fn parse_ts(s: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(s, TS_FMT).map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", s, e)))
}

fn parse_id(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("id '{}': {}", s, e)))
}

type EventRow = (String, u32, u8, String, String, f64, u32);
type DowntimeRow = (String, u32, u8, String, String, Option<String>, Option<i64>);

fn event_from_row(row: EventRow) -> Result<ProductionEvent, StoreError> {
    let (id, machine_id, shift_number, date, ts, length_m, joints) = row;
    Ok(ProductionEvent {
        id: parse_id(&id)?,
        machine_id,
        shift_number,
        production_date: parse_date(&date)?,
        timestamp: parse_ts(&ts)?,
        length_m,
        joints,
    })
}

fn downtime_from_row(row: DowntimeRow) -> Result<DowntimeInterval, StoreError> {
    let (id, machine_id, shift_number, date, start, end, duration_secs) = row;
    Ok(DowntimeInterval {
        id: parse_id(&id)?,
        machine_id,
        shift_number,
        production_date: parse_date(&date)?,
        start: parse_ts(&start)?,
        end: end.as_deref().map(parse_ts).transpose()?,
        duration_secs,
    })
}

const DOWNTIME_COLUMNS: &str =
    "id, machine_id, shift_number, production_date, start_time, end_time, duration_secs";

fn read_downtime(row: &rusqlite::Row<'_>) -> rusqlite::Result<DowntimeRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
}

impl EventStore for Database {
    fn insert_event(&self, event: &ProductionEvent) -> Result<bool, StoreError> {
        let conn = self.conn.lock();

        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO production_logs
               (event_id, machine_id, shift_number, production_date, timestamp, length_m, joints)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                event.id.to_string(),
                event.machine_id,
                event.shift_number,
                fmt_date(event.production_date),
                fmt_ts(event.timestamp),
                event.length_m,
                event.joints,
            ],
        )?;

        if inserted == 0 {
            debug!(id = %event.id, "Duplicate production event ignored");
        }
        Ok(inserted > 0)
    }

    fn upsert_downtime(&self, interval: &DowntimeInterval) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute(
            r#"INSERT INTO downtime_logs
               (id, machine_id, shift_number, production_date, start_time, end_time, duration_secs)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(id) DO UPDATE SET
                   end_time = excluded.end_time,
                   duration_secs = excluded.duration_secs"#,
            params![
                interval.id.to_string(),
                interval.machine_id,
                interval.shift_number,
                fmt_date(interval.production_date),
                fmt_ts(interval.start),
                interval.end.map(fmt_ts),
                interval.duration_secs,
            ],
        )?;

        Ok(())
    }

    fn output_totals(&self, machine_id: u32, date: NaiveDate, shift: Option<u8>) -> Result<OutputTotals, StoreError> {
        let conn = self.conn.lock();

        let (length_m, joints): (f64, i64) = conn.query_row(
            r#"SELECT COALESCE(SUM(length_m), 0.0), COALESCE(SUM(joints), 0)
               FROM production_logs
               WHERE machine_id = ?1 AND production_date = ?2
                 AND (?3 IS NULL OR shift_number = ?3)"#,
            params![machine_id, fmt_date(date), shift],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(OutputTotals {
            length_m,
            joints: joints.max(0) as u64,
        })
    }

    fn events(&self, machine_id: u32, date: NaiveDate, shift: Option<u8>) -> Result<Vec<ProductionEvent>, StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"SELECT event_id, machine_id, shift_number, production_date, timestamp, length_m, joints
               FROM production_logs
               WHERE machine_id = ?1 AND production_date = ?2
                 AND (?3 IS NULL OR shift_number = ?3)
               ORDER BY id"#,
        )?;

        let rows = stmt.query_map(params![machine_id, fmt_date(date), shift], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(event_from_row(row?)?);
        }
        Ok(results)
    }

    fn hourly_output(&self, machine_id: u32, date: NaiveDate) -> Result<Vec<(u32, f64)>, StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"SELECT CAST(strftime('%H', timestamp) AS INTEGER) AS hour, SUM(length_m)
               FROM production_logs
               WHERE machine_id = ?1 AND production_date = ?2
               GROUP BY hour
               ORDER BY hour"#,
        )?;

        let rows = stmt.query_map(params![machine_id, fmt_date(date)], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn downtime_intervals(
        &self,
        machine_id: u32,
        date: NaiveDate,
        shift: Option<u8>,
    ) -> Result<Vec<DowntimeInterval>, StoreError> {
        let conn = self.conn.lock();

        let sql = format!(
            r#"SELECT {} FROM downtime_logs
               WHERE machine_id = ?1 AND production_date = ?2
                 AND (?3 IS NULL OR shift_number = ?3)
               ORDER BY start_time"#,
            DOWNTIME_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![machine_id, fmt_date(date), shift], read_downtime)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(downtime_from_row(row?)?);
        }
        Ok(results)
    }

    fn open_downtime(&self, machine_id: u32) -> Result<Option<DowntimeInterval>, StoreError> {
        let conn = self.conn.lock();

        let sql = format!(
            r#"SELECT {} FROM downtime_logs
               WHERE machine_id = ?1 AND end_time IS NULL
               ORDER BY start_time DESC LIMIT 1"#,
            DOWNTIME_COLUMNS
        );
        let row = conn.query_row(&sql, params![machine_id], read_downtime).optional()?;
        row.map(downtime_from_row).transpose()
    }

    fn upsert_tally(&self, machine_id: u32, date: NaiveDate, hour: u32, meters: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute(
            r#"INSERT INTO tally_logs (machine_id, production_date, hour, meters)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(machine_id, production_date, hour) DO UPDATE SET meters = excluded.meters"#,
            params![machine_id, fmt_date(date), hour, meters],
        )?;

        Ok(())
    }

    fn hourly_tally(&self, machine_id: u32, date: NaiveDate) -> Result<Vec<(u32, f64)>, StoreError> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT hour, meters FROM tally_logs WHERE machine_id = ?1 AND production_date = ?2 ORDER BY hour",
        )?;
        let rows = stmt.query_map(params![machine_id, fmt_date(date)], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn tally_total(&self, machine_id: u32, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        let conn = self.conn.lock();

        let total: Option<f64> = conn.query_row(
            "SELECT SUM(meters) FROM tally_logs WHERE machine_id = ?1 AND production_date = ?2",
            params![machine_id, fmt_date(date)],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn daily_target(&self, date: NaiveDate) -> Result<Option<f64>, StoreError> {
        let conn = self.conn.lock();

        let target = conn
            .query_row(
                r#"SELECT target_m FROM production_targets
                   WHERE effective_date <= ?1
                   ORDER BY effective_date DESC LIMIT 1"#,
                params![fmt_date(date)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(target)
    }

    fn set_daily_target(&self, date: NaiveDate, meters: f64) -> Result<(), StoreError> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT OR REPLACE INTO production_targets (effective_date, target_m) VALUES (?1, ?2)",
            params![fmt_date(date), meters],
        )?;
        info!(date = %date, meters, "Daily target set");
        Ok(())
    }

    fn delete_day(&self, machine_id: u32, date: NaiveDate) -> Result<DeletedRows, StoreError> {
        let mut conn = self.conn.lock();
        let date = fmt_date(date);

        let tx = conn.transaction()?;
        let production = tx.execute(
            "DELETE FROM production_logs WHERE machine_id = ?1 AND production_date = ?2",
            params![machine_id, date],
        )?;
        let downtime = tx.execute(
            "DELETE FROM downtime_logs WHERE machine_id = ?1 AND production_date = ?2",
            params![machine_id, date],
        )?;
        let tally = tx.execute(
            "DELETE FROM tally_logs WHERE machine_id = ?1 AND production_date = ?2",
            params![machine_id, date],
        )?;
        tx.commit()?;

        let deleted = DeletedRows {
            production,
            downtime,
            tally,
        };
        info!(?deleted, date = %date, "Deleted day records");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn at(hour: u32, min: u32) -> NaiveDateTime {
        day().and_hms_opt(hour, min, 0).unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let event = ProductionEvent::new(1, 1, day(), at(8, 0), 1.2);

        assert!(db.insert_event(&event).unwrap());
        assert!(!db.insert_event(&event).unwrap());

        let totals = db.output_totals(1, day(), Some(1)).unwrap();
        assert_eq!(totals.joints, 1);
        assert!((totals.length_m - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_events_roundtrip_in_order() {
        let db = Database::open_in_memory().unwrap();
        let events: Vec<_> = (0..5)
            .map(|i| ProductionEvent::new(1, 1, day(), at(8, 0) + Duration::milliseconds(2500 * i), 1.2))
            .collect();
        for e in &events {
            db.insert_event(e).unwrap();
        }
        db.insert_event(&ProductionEvent::new(2, 1, day(), at(8, 0), 1.2)).unwrap();

        assert_eq!(db.events(1, day(), Some(1)).unwrap(), events);
        assert!(db.events(1, day(), Some(2)).unwrap().is_empty());
        assert_eq!(db.events(1, day(), None).unwrap().len(), 5);
    }

    #[test]
    fn test_hourly_output() {
        let db = Database::open_in_memory().unwrap();
        for ts in [at(7, 10), at(7, 50), at(9, 0)] {
            db.insert_event(&ProductionEvent::new(1, 1, day(), ts, 1.5)).unwrap();
        }
        assert_eq!(db.hourly_output(1, day()).unwrap(), vec![(7, 3.0), (9, 1.5)]);
    }

    #[test]
    fn test_downtime_open_then_close() {
        let db = Database::open_in_memory().unwrap();
        let open = DowntimeInterval::open(1, 1, day(), at(9, 0));
        db.upsert_downtime(&open).unwrap();
        assert_eq!(db.open_downtime(1).unwrap(), Some(open.clone()));

        let closed = open.close(at(9, 5));
        db.upsert_downtime(&closed).unwrap();
        assert_eq!(db.open_downtime(1).unwrap(), None);

        let stored = db.downtime_intervals(1, day(), Some(1)).unwrap();
        assert_eq!(stored, vec![closed]);
        assert_eq!(stored[0].duration_secs, Some(300));
    }

    #[test]
    fn test_tally_upsert_and_total() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.tally_total(1, day()).unwrap(), None);

        db.upsert_tally(1, day(), 8, 10.0).unwrap();
        db.upsert_tally(1, day(), 8, 12.0).unwrap();
        db.upsert_tally(1, day(), 9, 5.0).unwrap();

        assert_eq!(db.hourly_tally(1, day()).unwrap(), vec![(8, 12.0), (9, 5.0)]);
        assert_eq!(db.tally_total(1, day()).unwrap(), Some(17.0));
    }

    #[test]
    fn test_target_in_effect() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.daily_target(day()).unwrap(), None);

        db.set_daily_target(day(), 900.0).unwrap();
        db.set_daily_target(day() + Duration::days(10), 1200.0).unwrap();

        assert_eq!(db.daily_target(day() + Duration::days(3)).unwrap(), Some(900.0));
        assert_eq!(db.daily_target(day() + Duration::days(10)).unwrap(), Some(1200.0));
        assert_eq!(db.daily_target(day() - Duration::days(1)).unwrap(), None);
    }

    #[test]
    fn test_delete_day_scoped_to_machine_and_date() {
        let db = Database::open_in_memory().unwrap();
        let tomorrow = day() + Duration::days(1);
        db.insert_event(&ProductionEvent::new(1, 1, day(), at(8, 0), 1.2)).unwrap();
        db.insert_event(&ProductionEvent::new(1, 1, tomorrow, at(8, 0), 1.2)).unwrap();
        db.insert_event(&ProductionEvent::new(2, 1, day(), at(8, 0), 1.2)).unwrap();
        db.upsert_downtime(&DowntimeInterval::open(1, 1, day(), at(9, 0))).unwrap();
        db.upsert_tally(1, day(), 8, 1.0).unwrap();

        let deleted = db.delete_day(1, day()).unwrap();
        assert_eq!(
            deleted,
            DeletedRows {
                production: 1,
                downtime: 1,
                tally: 1
            }
        );
        assert_eq!(db.output_totals(1, day(), None).unwrap().joints, 0);
        assert_eq!(db.output_totals(1, tomorrow, None).unwrap().joints, 1);
        assert_eq!(db.output_totals(2, day(), None).unwrap().joints, 1);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("jointline.db");
        let event = ProductionEvent::new(1, 1, day(), at(8, 0), 1.2);
        {
            let db = Database::open(&path).unwrap();
            db.insert_event(&event).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.events(1, day(), None).unwrap(), vec![event]);
    }
}
