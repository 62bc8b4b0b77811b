//! Counters survive a process restart because they are rebuilt from disk

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tokio::sync::broadcast;

use jointline::config::DatabaseConfig;
use jointline::core::{EventBus, PersistenceWriter, StoreCommand, WriterHandle};
use jointline::security::{hash_pin, ResetAuthorizer, ResetCredential, SecurityConfig};
use jointline::{Database, DowntimeInterval, EventStore, ProductionEvent, SessionState, SessionStateManager};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

fn at(hour: u32, min: u32) -> NaiveDateTime {
    day().and_hms_opt(hour, min, 0).unwrap()
}

/// One process lifetime: a store on `path` with its writer task running
struct Process {
    store: Arc<Database>,
    writer: WriterHandle,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Process {
    fn start(path: &std::path::Path) -> Self {
        let store = Arc::new(Database::open(path).unwrap());
        let bus = Arc::new(EventBus::default());
        let (writer, handle) = PersistenceWriter::new(store.clone(), bus, 1, &DatabaseConfig::default());
        let (shutdown, _) = broadcast::channel(1);
        let task = tokio::spawn(writer.run(shutdown.subscribe()));
        Self {
            store,
            writer: handle,
            shutdown,
            task,
        }
    }

    fn sessions(&self) -> SessionStateManager {
        let security = SecurityConfig {
            reset_pin_hash: Some(hash_pin("2468").unwrap()),
            ..Default::default()
        };
        SessionStateManager::new(
            self.store.clone(),
            self.writer.clone(),
            ResetAuthorizer::new(&security),
            1,
        )
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.task.await.unwrap();
    }
}

#[tokio::test]
async fn test_rebuild_after_restart_matches_persisted_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jointline.db");

    let morning: Vec<_> = (0..12)
        .map(|i| ProductionEvent::new(1, 1, day(), at(7, 0) + Duration::seconds(i * 4), 1.2))
        .collect();
    let afternoon: Vec<_> = (0..5)
        .map(|i| ProductionEvent::new(1, 2, day(), at(15, 10) + Duration::seconds(i * 4), 1.2))
        .collect();

    // Downtime running across the 15:00 shift change, split in two
    let before = DowntimeInterval::open(1, 1, day(), at(14, 30));
    let after = DowntimeInterval::open(1, 2, day(), at(15, 0));

    let first = Process::start(&path);
    for event in morning.iter().chain(afternoon.iter()) {
        first.writer.submit(StoreCommand::Production(event.clone())).unwrap();
    }
    // A retried duplicate must not count twice
    first.writer.submit(StoreCommand::Production(morning[3].clone())).unwrap();
    first.writer.submit(StoreCommand::Downtime(before.clone())).unwrap();
    first.writer.submit(StoreCommand::Downtime(before.clone().close(at(15, 0)))).unwrap();
    first.writer.submit(StoreCommand::Downtime(after.clone())).unwrap();
    first.stop().await;

    let second = Process::start(&path);
    let sessions = second.sessions();

    let rebuilt = sessions.rebuild(day(), 1).await.unwrap();
    // The open interval is per machine, whichever shift is asked for
    let direct = SessionState {
        open_downtime_id: Some(after.id),
        ..SessionState::from_events(day(), 1, &morning)
    };
    assert_eq!(rebuilt, direct);
    assert_eq!(rebuilt.total_joints, 12);
    assert!((rebuilt.total_length_m - 14.4).abs() < 1e-9);

    let rebuilt = sessions.rebuild(day(), 2).await.unwrap();
    assert_eq!(rebuilt.total_joints, 5);
    assert_eq!(rebuilt.last_event_at, Some(at(15, 10) + Duration::seconds(16)));

    let closed = second.store.downtime_intervals(1, day(), Some(1)).unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].duration_secs, Some(1800));
    assert_eq!(second.store.open_downtime(1).unwrap().map(|i| i.id), Some(after.id));

    second.stop().await;
}

#[tokio::test]
async fn test_reset_outcome_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jointline.db");

    let events: Vec<_> = (0..4).map(|i| ProductionEvent::new(1, 1, day(), at(8, i), 1.2)).collect();

    let first = Process::start(&path);
    for event in &events {
        first.writer.submit(StoreCommand::Production(event.clone())).unwrap();
    }
    let mut sessions = first.sessions();
    let mut state = sessions.rebuild(day(), 1).await.unwrap();

    let denied = sessions.reset(&ResetCredential::new("0000"), &mut state, at(9, 0)).await;
    assert!(denied.is_err());
    assert_eq!(state.total_joints, 4);
    drop(sessions);
    first.stop().await;

    // The rejected reset left everything on disk
    let second = Process::start(&path);
    let mut sessions = second.sessions();
    let mut state = sessions.rebuild(day(), 1).await.unwrap();
    assert_eq!(state.total_joints, 4);

    let summary = sessions.reset(&ResetCredential::new("2468"), &mut state, at(9, 0)).await.unwrap();
    assert_eq!(summary.deleted.production, 4);
    assert_eq!(state.total_joints, 0);
    second.stop().await;

    let third = Process::start(&path);
    let state = third.sessions().rebuild(day(), 1).await.unwrap();
    assert_eq!(state.total_joints, 0);
    assert_eq!(third.store.output_totals(1, day(), None).unwrap().joints, 0);
    third.stop().await;
}
