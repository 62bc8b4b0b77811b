// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! jointline - production counting and OEE for finger-joint lines
//!
//! Reads the joint-pass sensor and machine-power flag from a discrete input
//! module, counts joints, tracks downtime per shift, and streams live OEE to
//! dashboards. Counters are a cache over an append-only event log and are
//! rebuilt from it after any restart.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Polling Engine                         │
//! │  ┌─────────┐  ┌──────────┐  ┌───────────┐  ┌──────────────┐   │
//! │  │  Input  │→ │ Debounce │→ │ Edge /    │→ │ Session      │   │
//! │  │ Manager │  │          │  │ Downtime  │  │ State        │   │
//! │  └─────────┘  └──────────┘  └───────────┘  └──────────────┘   │
//! └───────────────────────┬──────────────────────────┬────────────┘
//!                         ↓ write queue              ↓ watch
//!                 ┌──────────────┐          ┌──────────────────┐
//!                 │ Persistence  │─ commit →│    Broadcast     │
//!                 │   Writer     │  events  │    Scheduler     │
//!                 └──────┬───────┘          └────────┬─────────┘
//!                        ↓                           ↓
//!                 ┌──────────────┐          ┌──────────────────┐
//!                 │    SQLite    │← reads ──│ WebSocket / MQTT │
//!                 └──────────────┘          └──────────────────┘
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod db;
pub mod detection;
pub mod input;
pub mod security;
pub mod session;
pub mod streaming;

// Re-exports for convenience
pub use analysis::{ProductionSnapshot, ShiftClock, SnapshotBuilder};
pub use config::Config;
pub use core::{BroadcastScheduler, Engine, EngineHandle, EventBus, PersistenceWriter};
pub use db::{Database, EventStore};
pub use detection::{DowntimeInterval, ProductionEvent};
pub use session::{SessionState, SessionStateManager};
pub use streaming::{Broadcaster, StreamingManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
