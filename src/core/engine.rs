// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Polling engine - the single writer of session state
//!
//! One task reads the input source on a fixed cadence, drives the pure
//! detectors, and hands finished records to the persistence writer without
//! waiting on it. Other tasks observe through a `watch` channel and send
//! requests through [`EngineHandle`].

use chrono::{NaiveDate, NaiveDateTime};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::event_bus::{EngineEvent, EventBus};
use super::writer::{StoreCommand, WriterHandle};
use super::LiveStatus;
use crate::analysis::{ShiftClock, ShiftInfo};
use crate::config::{Config, ConfigError};
use crate::db::{DeletedRows, StoreError};
use crate::detection::{
    DowntimeInterval, DowntimeTracker, DowntimeTransition, EdgeDetector, EdgeOutcome, ProductionEvent,
    SignalDebouncer, TrackerPhase,
};
use crate::input::{InputManager, InputStatus, RawInputFrame};
use crate::security::ResetCredential;
use crate::session::{Rebuilt, ResetError, ResetSummary, SessionState, SessionStateManager};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid tally entry: {0}")]
    InvalidTally(String),

    #[error("engine is not running")]
    EngineStopped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Requests handled by the polling task between ticks
#[derive(Debug)]
pub enum EngineCommand {
    Reset {
        credential: ResetCredential,
        reply: oneshot::Sender<Result<ResetSummary, ResetError>>,
    },
    /// Good metres for one hour; `date` defaults to the current production date
    Tally {
        date: Option<NaiveDate>,
        hour: u32,
        meters: f64,
        reply: oneshot::Sender<Result<NaiveDate, CommandError>>,
    },
}

/// Mailbox into a running [`Engine`]
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn reset(&self, credential: ResetCredential) -> Result<ResetSummary, ResetError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Reset { credential, reply })
            .await
            .map_err(|_| ResetError::EngineStopped)?;
        rx.await.map_err(|_| ResetError::EngineStopped)?
    }

    /// Record a tally entry; returns the production date it was filed under
    /// once the entry is written
    pub async fn tally(&self, date: Option<NaiveDate>, hour: u32, meters: f64) -> Result<NaiveDate, CommandError> {
        if hour > 23 {
            return Err(CommandError::InvalidTally(format!("hour {} out of range", hour)));
        }
        if !meters.is_finite() || meters < 0.0 {
            return Err(CommandError::InvalidTally(format!("meters must be >= 0, got {}", meters)));
        }

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Tally {
                date,
                hour,
                meters,
                reply,
            })
            .await
            .map_err(|_| CommandError::EngineStopped)?;
        rx.await.map_err(|_| CommandError::EngineStopped)?
    }
}

/// Store rebuild running beside the polling loop
struct PendingRebuild {
    production_date: NaiveDate,
    shift_number: u8,
    outcome: oneshot::Receiver<Result<Rebuilt, StoreError>>,
    /// Counted meanwhile; the rebuild may or may not include them
    counted: Vec<ProductionEvent>,
}

/// Day reset queued behind pending writes
struct PendingReset {
    production_date: NaiveDate,
    outcome: oneshot::Receiver<Result<DeletedRows, StoreError>>,
    reply: oneshot::Sender<Result<ResetSummary, ResetError>>,
    /// Counted after the delete was queued, so written after it
    counted: Vec<ProductionEvent>,
    /// Open interval replaced when the reset was queued; closed instead if
    /// the delete fails
    superseded: Option<DowntimeInterval>,
}

/// Run `job` on its own task and hand back its result channel
fn detach<T, F>(job: F) -> oneshot::Receiver<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(job.await);
    });
    rx
}

pub struct Engine {
    machine_id: u32,
    poll_interval: Duration,
    debounce_ms: u64,

    input: InputManager,
    debouncer: SignalDebouncer,
    edges: EdgeDetector,
    downtime: DowntimeTracker,
    shifts: ShiftClock,

    sessions: SessionStateManager,
    state: SessionState,
    writer: WriterHandle,
    rebuild_pending: bool,
    rebuilding: Option<PendingRebuild>,
    resetting: Option<PendingReset>,
    primed: bool,
    input_status: InputStatus,

    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    status_tx: watch::Sender<LiveStatus>,
    mailbox: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    pub fn new(
        config: &Config,
        input: InputManager,
        sessions: SessionStateManager,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Result<(Self, EngineHandle, watch::Receiver<LiveStatus>), ConfigError> {
        let shifts = config.shift_clock()?;
        let now = clock.now();
        let shift = shifts.current_shift(now);
        let production_date = shifts.production_date(now);
        let state = SessionState::for_period(production_date, shift.number);

        let initial = LiveStatus {
            session: state.clone(),
            shift,
            production_date,
            downtime: TrackerPhase::Up,
            machine_power: false,
            input: input.health().clone(),
            updated_at: now,
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let (handle, mailbox) = EngineHandle::channel(16);

        let engine = Self {
            machine_id: config.machine_id,
            poll_interval: Duration::from_millis(config.io.poll_interval_ms.max(1)),
            debounce_ms: config.io.debounce_ms,

            input_status: input.status(),
            input,
            debouncer: SignalDebouncer::new(config.io.debounce_ms),
            edges: EdgeDetector::new(
                config.machine_id,
                config.production.length_per_joint_m,
                config.production.min_retrigger_ms,
            ),
            downtime: DowntimeTracker::new(config.machine_id, config.downtime.min_downtime_secs, shifts.clone()),
            shifts,

            writer: sessions.writer().clone(),
            sessions,
            state,
            rebuild_pending: false,
            rebuilding: None,
            resetting: None,
            primed: false,

            bus,
            clock,
            status_tx,
            mailbox,
        };

        Ok((engine, handle, status_rx))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(machine = self.machine_id, "Starting polling engine");
        self.input.start().await;

        if let Err(e) = self.recover().await {
            error!("Session recovery failed, counting from zero until the store is readable: {}", e);
            self.rebuild_pending = true;
        }

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                Some(command) = self.mailbox.recv() => self.handle_command(command).await,
                _ = shutdown.recv() => {
                    info!("Polling engine shutting down");
                    break;
                }
            }
        }

        // An open interval stays open in the store and is restored on restart
        self.input.stop().await;
    }

    /// Rebuild counters from the store and resume any open downtime. An
    /// interval left open by a previous run is only resumed when it belongs
    /// to the current shift; otherwise it is closed at its shift's end.
    pub async fn recover(&mut self) -> Result<(), StoreError> {
        let now = self.clock.now();
        let shift = self.shifts.current_shift(now);
        let date = self.shifts.production_date(now);

        let rebuilt = self.sessions.rebuild(date, shift.number).await?;
        self.state = self.state.merge_live(rebuilt);

        if let Some(open) = self.sessions.store().open_downtime(self.machine_id)? {
            if shift.is_operational && open.shift_number == shift.number && open.production_date == date {
                self.downtime.restore(open);
            } else {
                let end = self
                    .shifts
                    .shift_end(open.shift_number, open.production_date)
                    .map_or(now, |end| end.min(now));
                let closed = open.close(end);
                info!(
                    id = %closed.id,
                    duration_secs = closed.duration_secs.unwrap_or(0),
                    "Closed downtime left open by previous run"
                );
                self.submit(StoreCommand::Downtime(closed));
            }
        }

        self.state.open_downtime_id = self.downtime.open_id();
        self.rebuild_pending = false;
        self.publish_live(now);
        Ok(())
    }

    /// One poll: read, detect, enqueue, publish. Never waits on the store;
    /// rebuilds and resets run beside the loop and land on a later tick.
    pub async fn tick(&mut self) {
        let now = self.clock.now();
        let frame = self.input.read(now).await.ok();
        self.track_input_status();

        let shift = self.shifts.current_shift(now);
        let date = self.shifts.production_date(now);

        if !self.state.belongs_to(date, shift.number) {
            info!(date = %date, shift = %shift.id, "Shift changed");
            self.state = self.state.merge_live(SessionState::for_period(date, shift.number));
            self.rebuild_pending = true;
        }

        if let Some(frame) = frame {
            self.on_frame(frame, &shift, date, now);
        }

        self.poll_reset(now);
        self.poll_rebuild();

        // Evaluate the writer's flag first so it is always cleared
        if self.writer.take_rebuild_request() || self.rebuild_pending {
            self.rebuild_pending = true;
            if self.rebuilding.is_none() && self.resetting.is_none() {
                self.start_rebuild(date, shift.number);
            }
        }

        self.publish_live(now);
    }

    fn on_frame(&mut self, frame: RawInputFrame, shift: &ShiftInfo, date: NaiveDate, now: NaiveDateTime) {
        if !self.primed {
            // A sensor already high at start-up is not a joint
            self.debouncer = SignalDebouncer::with_initial(self.debounce_ms, frame.joint_sensor());
            self.state.last_sensor = frame.joint_sensor();
            self.primed = true;
        }

        let sensor = self.debouncer.stabilize(frame.joint_sensor(), now);
        let power = frame.machine_power();

        if let EdgeOutcome::Counted(event) = self.edges.on_frame(&mut self.state, sensor, power, shift, date, now) {
            debug!(
                shift = event.shift_number,
                joints = self.state.total_joints,
                length_m = self.state.total_length_m,
                "Joint counted"
            );
            if let Some(pending) = &mut self.rebuilding {
                pending.counted.push(event.clone());
            }
            if let Some(pending) = &mut self.resetting {
                pending.counted.push(event.clone());
            }
            self.submit(StoreCommand::Production(event));
        }

        for transition in self.downtime.on_power(power, shift, date, now) {
            match transition {
                DowntimeTransition::Opened(interval) | DowntimeTransition::Closed(interval) => {
                    self.submit(StoreCommand::Downtime(interval));
                }
                DowntimeTransition::Discarded { .. } => {}
            }
        }
        self.state.open_downtime_id = self.downtime.open_id();
    }

    fn start_rebuild(&mut self, production_date: NaiveDate, shift_number: u8) {
        debug!(date = %production_date, shift = shift_number, "Rebuilding session from the store");
        self.rebuild_pending = false;
        self.rebuilding = Some(PendingRebuild {
            production_date,
            shift_number,
            outcome: detach(self.sessions.rebuild_job(production_date, shift_number)),
            counted: Vec::new(),
        });
    }

    fn poll_rebuild(&mut self) {
        let outcome = match self.rebuilding.as_mut().map(|p| p.outcome.try_recv()) {
            None | Some(Err(TryRecvError::Empty)) => return,
            Some(Ok(outcome)) => outcome,
            Some(Err(TryRecvError::Closed)) => Err(StoreError::WriterClosed),
        };
        let Some(pending) = self.rebuilding.take() else {
            return;
        };

        match outcome {
            Ok(rebuilt) if self.state.belongs_to(pending.production_date, pending.shift_number) => {
                let mut state = self.state.merge_live(rebuilt.state.clone());
                for event in pending.counted.iter().filter(|e| {
                    e.production_date == pending.production_date
                        && e.shift_number == pending.shift_number
                        && !rebuilt.covers(&e.id)
                }) {
                    state.apply(event);
                }
                state.open_downtime_id = self.downtime.open_id();
                self.state = state;
            }
            // The period moved on while it ran; the rollover asked for another
            Ok(_) => self.rebuild_pending = true,
            Err(e) => {
                warn!("Session rebuild failed, will retry next poll: {}", e);
                self.rebuild_pending = true;
            }
        }
    }

    /// Enqueue without waiting. A lost record is already logged with its
    /// payload by the writer handle, which also requests a rebuild.
    fn submit(&self, command: StoreCommand) {
        let _ = self.writer.submit(command);
    }

    fn track_input_status(&mut self) {
        let status = self.input.status();
        if status != self.input_status {
            match status {
                InputStatus::Connected => info!("Input status: {:?}", status),
                _ => warn!("Input status: {:?}", status),
            }
            self.input_status = status;
            self.bus.publish(EngineEvent::InputStatusChanged { status });
        }
    }

    fn publish_live(&self, now: NaiveDateTime) {
        let live = LiveStatus {
            session: self.state.clone(),
            shift: self.shifts.current_shift(now),
            production_date: self.shifts.production_date(now),
            downtime: self.downtime.phase(),
            machine_power: self.state.last_power,
            input: self.input.health().clone(),
            updated_at: now,
        };
        // Receivers may all be gone during shutdown
        let _ = self.status_tx.send(live);
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Reset { credential, reply } => self.start_reset(credential, reply),
            EngineCommand::Tally {
                date,
                hour,
                meters,
                reply,
            } => {
                let date = date.unwrap_or_else(|| self.shifts.production_date(self.clock.now()));
                let (committed, outcome) = oneshot::channel();
                let command = StoreCommand::Tally {
                    date,
                    hour,
                    meters,
                    committed: Some(committed),
                };

                if let Err(e) = self.writer.submit(command) {
                    let _ = reply.send(Err(e.into()));
                    return;
                }
                // Answer once written, without holding up the loop
                tokio::spawn(async move {
                    let result = match outcome.await {
                        Ok(Ok(())) => Ok(date),
                        Ok(Err(e)) => Err(CommandError::Store(e)),
                        Err(_) => Err(CommandError::Store(StoreError::WriterClosed)),
                    };
                    let _ = reply.send(result);
                });
            }
        }
    }

    /// Authorize now, queue the delete, and finish in [`Self::poll_reset`]
    fn start_reset(&mut self, credential: ResetCredential, reply: oneshot::Sender<Result<ResetSummary, ResetError>>) {
        if self.resetting.is_some() {
            let _ = reply.send(Err(ResetError::InProgress));
            return;
        }

        let now = self.clock.now();
        if let Err(e) = self.sessions.authorize(&credential, now) {
            let _ = reply.send(Err(e));
            return;
        }

        let production_date = self
            .state
            .production_date
            .unwrap_or_else(|| self.shifts.production_date(now));
        let outcome = match self.writer.queue_reset_day(production_date) {
            Ok(outcome) => outcome,
            Err(e) => {
                let _ = reply.send(Err(ResetError::Store(e)));
                return;
            }
        };

        // Its rows are about to be deleted
        self.rebuilding = None;

        // The open interval goes with the day; continue it as a fresh one
        // queued behind the delete
        let superseded = self.downtime.open_interval().map(|open| open.clone().close(now));
        if let Some(DowntimeTransition::Opened(interval)) = self.downtime.restart_at(now) {
            self.submit(StoreCommand::Downtime(interval));
        }
        self.state.open_downtime_id = self.downtime.open_id();

        self.resetting = Some(PendingReset {
            production_date,
            outcome,
            reply,
            counted: Vec::new(),
            superseded,
        });
    }

    fn poll_reset(&mut self, now: NaiveDateTime) {
        let outcome = match self.resetting.as_mut().map(|p| p.outcome.try_recv()) {
            None | Some(Err(TryRecvError::Empty)) => return,
            Some(Ok(outcome)) => outcome,
            Some(Err(TryRecvError::Closed)) => Err(StoreError::WriterClosed),
        };
        let Some(pending) = self.resetting.take() else {
            return;
        };

        let result = match outcome {
            Ok(deleted) => {
                if self.state.production_date == Some(pending.production_date) {
                    let mut state = self.state.after_reset();
                    let current = self.state.shift_number;
                    for event in pending
                        .counted
                        .iter()
                        .filter(|e| e.production_date == pending.production_date && e.shift_number == current)
                    {
                        state.apply(event);
                    }
                    state.open_downtime_id = self.downtime.open_id();
                    self.state = state;
                }

                info!(date = %pending.production_date, ?deleted, "Production data reset by operator");
                self.publish_live(now);
                self.bus.publish(EngineEvent::ResetCompleted(deleted.clone()));
                Ok(ResetSummary {
                    production_date: pending.production_date,
                    deleted,
                })
            }
            Err(e) => {
                error!("Day reset failed: {}", e);
                if let Some(old) = pending.superseded {
                    self.submit(StoreCommand::Downtime(old));
                }
                self.rebuild_pending = true;
                Err(ResetError::Store(e))
            }
        };

        let _ = pending.reply.send(result);
    }
}
