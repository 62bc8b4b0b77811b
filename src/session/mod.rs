// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Session module - crash-safe counters rebuilt from the event log

mod state;

pub use state::SessionState;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::core::WriterHandle;
use crate::db::{DeletedRows, EventStore, StoreError};
use crate::security::{AuthError, ResetAuthorizer, ResetCredential};

#[derive(Debug, Error)]
pub enum ResetError {
    #[error("reset not authorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("reset failed: {0}")]
    Store(#[from] StoreError),

    #[error("engine is not running")]
    EngineStopped,

    #[error("a reset is already in progress")]
    InProgress,
}

/// Outcome of a completed reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetSummary {
    pub production_date: NaiveDate,
    pub deleted: DeletedRows,
}

/// Counters recomputed from the store, with the ids of the events behind them
#[derive(Debug, Clone)]
pub struct Rebuilt {
    pub state: SessionState,
    covered: HashSet<Uuid>,
}

impl Rebuilt {
    /// Whether `event_id` is already part of `state`
    pub fn covers(&self, event_id: &Uuid) -> bool {
        self.covered.contains(event_id)
    }
}

/// Owns the path from persisted records back to [`SessionState`]
pub struct SessionStateManager {
    store: Arc<dyn EventStore>,
    writer: WriterHandle,
    authorizer: ResetAuthorizer,
    machine_id: u32,
}

impl SessionStateManager {
    pub fn new(store: Arc<dyn EventStore>, writer: WriterHandle, authorizer: ResetAuthorizer, machine_id: u32) -> Self {
        Self {
            store,
            writer,
            authorizer,
            machine_id,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Recompute counters for `(date, shift)` from the store. Pending writes
    /// are flushed first so the result covers every accepted event.
    pub async fn rebuild(&self, production_date: NaiveDate, shift_number: u8) -> Result<SessionState, StoreError> {
        Ok(self.rebuild_job(production_date, shift_number).await?.state)
    }

    /// [`rebuild`](Self::rebuild) detached from `self`, for a caller that
    /// keeps running while the write queue drains. Events written after the
    /// flush may or may not be in the result; [`Rebuilt::covers`] tells.
    pub fn rebuild_job(
        &self,
        production_date: NaiveDate,
        shift_number: u8,
    ) -> impl Future<Output = Result<Rebuilt, StoreError>> + Send + 'static {
        let store = self.store.clone();
        let writer = self.writer.clone();
        let machine_id = self.machine_id;

        async move {
            writer.flush().await?;

            let events = store.events(machine_id, production_date, Some(shift_number))?;
            let mut state = SessionState::from_events(production_date, shift_number, &events);
            state.open_downtime_id = store.open_downtime(machine_id)?.map(|i| i.id);

            info!(
                date = %production_date,
                shift = shift_number,
                joints = state.total_joints,
                length_m = state.total_length_m,
                "Session rebuilt from event log"
            );
            Ok(Rebuilt {
                state,
                covered: events.iter().map(|e| e.id).collect(),
            })
        }
    }

    pub fn authorize(&mut self, credential: &ResetCredential, now: NaiveDateTime) -> Result<(), ResetError> {
        self.authorizer.authorize(credential, now)?;
        Ok(())
    }

    /// Check the credential, delete the day's records behind all pending
    /// writes, then zero `state`. Nothing changes unless all three succeed
    /// in that order.
    pub async fn reset(
        &mut self,
        credential: &ResetCredential,
        state: &mut SessionState,
        now: NaiveDateTime,
    ) -> Result<ResetSummary, ResetError> {
        self.authorize(credential, now)?;

        let production_date = state.production_date.unwrap_or_else(|| now.date());
        let deleted = self.writer.reset_day(production_date).await?;

        *state = SessionState {
            production_date: Some(production_date),
            ..state.after_reset()
        };

        info!(date = %production_date, ?deleted, "Production data reset by operator");
        Ok(ResetSummary {
            production_date,
            deleted,
        })
    }
}
