//! Analysis module - shift calendar, OEE and broadcast snapshots

pub mod oee;
mod shift;
mod snapshot;

pub use oee::{OeeInputs, OeeResult, QualityYield, TargetStatus};
pub use shift::{default_shifts, ShiftClock, ShiftInfo, ShiftWindow};
pub use snapshot::{ProductionSnapshot, SnapshotBuilder, TrendSeries};
