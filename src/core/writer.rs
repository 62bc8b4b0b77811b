// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Persistence writer - the only task that writes to the store
//!
//! Commands are drained by a single consumer in FIFO order. A failing write
//! is retried with exponential backoff before the next command is looked
//! at, so production events land in detection order and downtime open/close
//! pairs never swap.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::event_bus::{EngineEvent, EventBus};
use crate::config::DatabaseConfig;
use crate::db::{DeletedRows, EventStore, StoreError};
use crate::detection::{DowntimeInterval, ProductionEvent};

/// One unit of work for the writer
#[derive(Debug)]
pub enum StoreCommand {
    Production(ProductionEvent),
    Downtime(DowntimeInterval),
    Tally {
        date: NaiveDate,
        hour: u32,
        meters: f64,
        /// Answered once the entry is written or given up
        committed: Option<oneshot::Sender<Result<(), StoreError>>>,
    },
    /// Delete the day's rows once everything queued before it is written
    ResetDay {
        date: NaiveDate,
        reply: oneshot::Sender<Result<DeletedRows, StoreError>>,
    },
    /// Barrier; answered once everything queued before it is written
    Flush(oneshot::Sender<()>),
}

impl StoreCommand {
    fn label(&self) -> &'static str {
        match self {
            StoreCommand::Production(_) => "production event",
            StoreCommand::Downtime(_) => "downtime interval",
            StoreCommand::Tally { .. } => "tally entry",
            StoreCommand::ResetDay { .. } => "day reset",
            StoreCommand::Flush(_) => "flush",
        }
    }

    /// JSON of the record, for manual replay
    fn payload(&self) -> String {
        #[derive(Serialize)]
        struct Tally {
            date: NaiveDate,
            hour: u32,
            meters: f64,
        }

        let json = match self {
            StoreCommand::Production(e) => serde_json::to_string(e),
            StoreCommand::Downtime(i) => serde_json::to_string(i),
            StoreCommand::Tally { date, hour, meters, .. } => serde_json::to_string(&Tally {
                date: *date,
                hour: *hour,
                meters: *meters,
            }),
            StoreCommand::ResetDay { date, .. } => serde_json::to_string(date),
            StoreCommand::Flush(_) => Ok(String::new()),
        };
        json.unwrap_or_else(|e| format!("<unserializable: {}>", e))
    }
}

/// Exponential backoff between write attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            base: Duration::from_millis(config.retry_base_ms),
            max: Duration::from_millis(config.retry_max_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Producer side of the write queue
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<StoreCommand>,
    needs_rebuild: Arc<AtomicBool>,
}

impl WriterHandle {
    /// Enqueue without waiting. A full or closed queue loses the record, so
    /// it is logged with its payload and a rebuild is requested.
    pub fn submit(&self, command: StoreCommand) -> Result<(), StoreError> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(command)) => {
                error!(
                    what = command.label(),
                    payload = %command.payload(),
                    "Write queue full, record dropped"
                );
                self.needs_rebuild.store(true, Ordering::SeqCst);
                Err(StoreError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                error!(
                    what = command.label(),
                    payload = %command.payload(),
                    "Persistence writer stopped, record dropped"
                );
                self.needs_rebuild.store(true, Ordering::SeqCst);
                Err(StoreError::WriterClosed)
            }
        }
    }

    /// Wait until everything queued so far has been written or given up
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Flush(tx))
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)
    }

    /// Delete a day's rows behind all pending writes
    pub async fn reset_day(&self, date: NaiveDate) -> Result<DeletedRows, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::ResetDay { date, reply })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Queue a day reset without waiting. Anything submitted after this
    /// call is written after the delete.
    pub fn queue_reset_day(
        &self,
        date: NaiveDate,
    ) -> Result<oneshot::Receiver<Result<DeletedRows, StoreError>>, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.try_send(StoreCommand::ResetDay { date, reply }).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => StoreError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => StoreError::WriterClosed,
        })?;
        Ok(rx)
    }

    /// True once per lost write; the caller should rebuild from the store
    pub fn take_rebuild_request(&self) -> bool {
        self.needs_rebuild.swap(false, Ordering::SeqCst)
    }
}

/// Consumer side of the write queue
pub struct PersistenceWriter {
    store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
    machine_id: u32,
    retry: RetryPolicy,
    rx: mpsc::Receiver<StoreCommand>,
    needs_rebuild: Arc<AtomicBool>,
}

impl PersistenceWriter {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Arc<EventBus>,
        machine_id: u32,
        config: &DatabaseConfig,
    ) -> (Self, WriterHandle) {
        let (tx, rx) = mpsc::channel(config.write_queue_capacity.max(1));
        let needs_rebuild = Arc::new(AtomicBool::new(false));

        let writer = Self {
            store,
            bus,
            machine_id,
            retry: RetryPolicy::from_config(config),
            rx,
            needs_rebuild: needs_rebuild.clone(),
        };
        (writer, WriterHandle { tx, needs_rebuild })
    }

    /// Drain the queue until every handle is dropped or shutdown is
    /// signalled. Commands already queued at shutdown are still written.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Persistence writer started");

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.apply(command).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    self.rx.close();
                    while let Some(command) = self.rx.recv().await {
                        self.apply(command).await;
                    }
                    break;
                }
            }
        }

        info!("Persistence writer stopped");
    }

    async fn apply(&self, mut command: StoreCommand) {
        let machine_id = self.machine_id;

        match command {
            StoreCommand::Flush(done) => {
                let _ = done.send(());
            }
            StoreCommand::ResetDay { date, reply } => {
                let result = self.with_retry("day reset", || self.store.delete_day(machine_id, date)).await;
                let _ = reply.send(result);
            }
            StoreCommand::Production(ref event) => {
                match self.with_retry(command.label(), || self.store.insert_event(event)).await {
                    Ok(true) => self.bus.publish(EngineEvent::ProductionCommitted(event.clone())),
                    Ok(false) => {}
                    Err(e) => self.give_up(&command, e),
                }
            }
            StoreCommand::Downtime(ref interval) => {
                match self.with_retry(command.label(), || self.store.upsert_downtime(interval)).await {
                    Ok(()) => self.bus.publish(EngineEvent::DowntimeCommitted(interval.clone())),
                    Err(e) => self.give_up(&command, e),
                }
            }
            StoreCommand::Tally {
                date,
                hour,
                meters,
                ref mut committed,
            } => {
                let committed = committed.take();
                let outcome = match self
                    .with_retry(command.label(), || self.store.upsert_tally(machine_id, date, hour, meters))
                    .await
                {
                    Ok(()) => {
                        self.bus.publish(EngineEvent::TallyCommitted { date, hour, meters });
                        Ok(())
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.give_up(&command, e);
                        Err(StoreError::GaveUp(reason))
                    }
                };
                if let Some(committed) = committed {
                    let _ = committed.send(outcome);
                }
            }
        }
    }

    async fn with_retry<T, F>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(what, attempt, "Write succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(what, attempt, ?delay, "Write failed, retrying: {}", e);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn give_up(&self, command: &StoreCommand, e: StoreError) {
        let payload = command.payload();
        error!(
            what = command.label(),
            payload = %payload,
            "Write failed after {} retries: {}",
            self.retry.max_retries,
            e
        );
        self.needs_rebuild.store(true, Ordering::SeqCst);
        self.bus.publish(EngineEvent::PersistenceFailed {
            what: command.label().to_string(),
            payload,
            error: e.to_string(),
        });
    }
}
