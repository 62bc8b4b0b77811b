// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Broadcast scheduler - periodic and event-driven snapshot publishing

use chrono::NaiveDateTime;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::event_bus::EngineEvent;
use super::LiveStatus;
use crate::analysis::SnapshotBuilder;
use crate::input::InputStatus;
use crate::streaming::Broadcaster;

/// Publishes a snapshot every interval and right after every committed
/// change. Also watches for an input that is connected but silent.
pub struct BroadcastScheduler {
    builder: SnapshotBuilder,
    broadcaster: Arc<dyn Broadcaster>,
    status: watch::Receiver<LiveStatus>,
    events: broadcast::Receiver<EngineEvent>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    stale_after: chrono::Duration,
    reported: Option<InputStatus>,
}

impl BroadcastScheduler {
    pub fn new(
        builder: SnapshotBuilder,
        broadcaster: Arc<dyn Broadcaster>,
        status: watch::Receiver<LiveStatus>,
        events: broadcast::Receiver<EngineEvent>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            builder,
            broadcaster,
            status,
            events,
            clock,
            interval,
            stale_after: chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::seconds(5)),
            reported: None,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Broadcast scheduler started, interval {:?}", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.broadcast_now().await,
                event = self.events.recv() => match event {
                    Ok(EngineEvent::ResetCompleted(_)) => {
                        self.broadcast_now().await;
                        if let Err(e) = self.broadcaster.publish_reset_done().await {
                            warn!("Failed to publish reset notice: {}", e);
                        }
                    }
                    // Already logged with its payload by the writer
                    Ok(EngineEvent::PersistenceFailed { .. }) => {}
                    Ok(_) => self.broadcast_now().await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Scheduler lagged by {} events, recomputing", n);
                        self.broadcast_now().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => break,
            }
        }

        info!("Broadcast scheduler stopped");
    }

    /// Input status as the dashboard should see it
    fn effective_status(&self, live: &LiveStatus, now: NaiveDateTime) -> InputStatus {
        match (live.input.status, live.input.last_success) {
            (InputStatus::Connected, Some(last)) if now - last > self.stale_after => InputStatus::Stale,
            (status, _) => status,
        }
    }

    async fn check_input(&mut self, live: &LiveStatus, now: NaiveDateTime) -> InputStatus {
        let status = self.effective_status(live, now);

        if self.reported != Some(status) {
            if status == InputStatus::Stale {
                warn!(
                    source = %live.input.source,
                    last_success = ?live.input.last_success,
                    "No successful input read for over {}s",
                    self.stale_after.num_seconds()
                );
            }
            if let Err(e) = self.broadcaster.publish_input_status(status).await {
                warn!("Failed to publish input status: {}", e);
            }
            self.reported = Some(status);
        }

        status
    }

    pub async fn broadcast_now(&mut self) {
        let live = self.status.borrow().clone();
        let now = self.clock.now();

        let status = self.check_input(&live, now).await;
        let snapshot = self.builder.build(&live, status, now);

        if let Err(e) = self.broadcaster.publish_snapshot(&snapshot).await {
            warn!("Failed to publish snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{ShiftClock, ShiftInfo};
    use crate::core::{EventBus, TokioClock};
    use crate::db::{Database, DeletedRows};
    use crate::detection::TrackerPhase;
    use crate::input::{InputHealth, InputMode};
    use crate::session::SessionState;
    use crate::streaming::{BroadcastMessage, ChannelBroadcaster};
    use chrono::NaiveDate;
    use tokio::sync::mpsc;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn live(last_success: NaiveDateTime) -> LiveStatus {
        let shift = ShiftClock::default().current_shift(base());
        LiveStatus {
            session: SessionState::for_period(base().date(), shift.number),
            shift,
            production_date: base().date(),
            downtime: TrackerPhase::Up,
            machine_power: true,
            input: InputHealth {
                source: "test".into(),
                mode: InputMode::Simulated,
                status: InputStatus::Connected,
                reads_count: 1,
                error_count: 0,
                last_error: None,
                last_success: Some(last_success),
            },
            updated_at: last_success,
        }
    }

    struct Rig {
        bus: Arc<EventBus>,
        status: watch::Sender<LiveStatus>,
        rx: mpsc::UnboundedReceiver<BroadcastMessage>,
        shutdown: broadcast::Sender<()>,
    }

    fn start() -> Rig {
        let store = Arc::new(Database::open_in_memory().unwrap());
        let builder = SnapshotBuilder::new(store, ShiftClock::default(), 1, Some(1500.0));
        let (broadcaster, rx) = ChannelBroadcaster::new();
        let bus = Arc::new(EventBus::new(64));
        let (status, status_rx) = watch::channel(live(base()));
        let (shutdown, _) = broadcast::channel(1);

        let scheduler = BroadcastScheduler::new(
            builder,
            Arc::new(broadcaster),
            status_rx,
            bus.subscribe(),
            Arc::new(TokioClock::starting_at(base())),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        tokio::spawn(scheduler.run(shutdown.subscribe()));

        Rig {
            bus,
            status,
            rx,
            shutdown,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BroadcastMessage>) -> Vec<BroadcastMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_precedes_reset_notice() {
        let mut rig = start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let first = drain(&mut rig.rx);
        assert_eq!(
            first[0],
            BroadcastMessage::SensorStatus {
                status: InputStatus::Connected
            }
        );
        match &first[1] {
            BroadcastMessage::ProductionUpdate { data } => {
                assert_eq!(data.target_m, Some(750.0));
                assert!(!data.stale);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        rig.bus.publish(EngineEvent::ResetCompleted(DeletedRows::default()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let after = drain(&mut rig.rx);
        assert_eq!(after.len(), 2);
        assert!(matches!(after[0], BroadcastMessage::ProductionUpdate { .. }));
        assert_eq!(after[1], BroadcastMessage::ResetDone);

        let _ = rig.shutdown.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_input_is_reported_stale() {
        let mut rig = start();

        // Ticks at 0, 5 and 10 s; only the last is past the threshold
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let messages = drain(&mut rig.rx);
        let statuses: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                BroadcastMessage::SensorStatus { status } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![InputStatus::Connected, InputStatus::Stale]);

        match messages.last() {
            Some(BroadcastMessage::ProductionUpdate { data }) => assert_eq!(data.input_status, InputStatus::Stale),
            other => panic!("expected snapshot, got {:?}", other),
        }

        // Reads resume
        let _ = rig.status.send(live(base() + chrono::Duration::seconds(14)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        let recovered = drain(&mut rig.rx);
        assert_eq!(
            recovered[0],
            BroadcastMessage::SensorStatus {
                status: InputStatus::Connected
            }
        );

        let _ = rig.shutdown.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn test_committed_events_trigger_snapshot() {
        let mut rig = start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rig.rx);

        let standby = LiveStatus {
            shift: ShiftInfo::standby(),
            ..live(base())
        };
        let _ = rig.status.send(standby);
        rig.bus.publish(EngineEvent::InputStatusChanged {
            status: InputStatus::Connected,
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        match drain(&mut rig.rx).as_slice() {
            [BroadcastMessage::ProductionUpdate { data }] => {
                assert_eq!(data.target_m, None);
                assert!(data.oee.is_none());
            }
            other => panic!("expected one snapshot, got {:?}", other),
        }

        let _ = rig.shutdown.send(());
    }
}
