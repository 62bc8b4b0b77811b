// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! jointline - production counter and OEE service for finger-joint lines

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use jointline::{Config, EventStore, VERSION};

/// jointline - production counting and OEE for finger-joint lines
#[derive(Parser, Debug)]
#[command(name = "jointline")]
#[command(author = "bad-antics")]
#[command(version = VERSION)]
#[command(about = "Joint counting, downtime tracking and live OEE for finger-joint lines")]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the counter until Ctrl+C
    Run {
        /// Use the synthetic input generator instead of the serial port
        #[arg(long)]
        simulate: bool,

        /// WebSocket server port
        #[arg(long)]
        ws_port: Option<u16>,

        /// MQTT broker address; enables MQTT
        #[arg(long)]
        mqtt_broker: Option<String>,

        /// Directory for the database
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the Argon2 hash of a reset PIN for `security.reset_pin_hash`
    HashPin {
        pin: String,
    },

    /// Set the daily production target from a date onwards
    SetTarget {
        #[arg(long)]
        date: NaiveDate,

        #[arg(long)]
        meters: f64,
    },

    /// Record good metres for one hour
    Tally {
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=23))]
        hour: u32,

        #[arg(long)]
        meters: f64,

        /// Defaults to the current production date
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // RUST_LOG wins over flags, flags over the config file
    let level = if args.trace {
        "trace"
    } else if args.debug {
        "debug"
    } else {
        config.log_level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run {
            simulate,
            ws_port,
            mqtt_broker,
            data_dir,
        } => {
            if simulate {
                config.simulate = true;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(port) = ws_port {
                config.streaming.websocket_port = port;
            }
            if let Some(mqtt) = mqtt_broker {
                config.streaming.mqtt_enabled = true;
                config.streaming.mqtt_broker = mqtt;
            }
            config.validate()?;

            info!("jointline v{} - machine {}", VERSION, config.machine_id);
            info!("Configuration loaded from {:?}", config_path);

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_headless(config))
        }
        Command::HashPin { pin } => {
            let hash = jointline::security::hash_pin(&pin)?;
            println!("{}", hash);
            Ok(())
        }
        Command::SetTarget { date, meters } => {
            anyhow::ensure!(meters.is_finite() && meters >= 0.0, "target must be >= 0, got {}", meters);
            let db = open_database(&config)?;
            db.set_daily_target(date, meters)?;
            info!("Daily target from {} set to {} m", date, meters);
            Ok(())
        }
        Command::Tally { hour, meters, date } => {
            anyhow::ensure!(meters.is_finite() && meters >= 0.0, "meters must be >= 0, got {}", meters);
            let date = match date {
                Some(date) => date,
                None => config.shift_clock()?.production_date(chrono::Local::now().naive_local()),
            };
            let db = open_database(&config)?;
            db.upsert_tally(config.machine_id, date, hour, meters)?;
            info!("Tally {} {:02}:00 = {} m", date, hour, meters);
            Ok(())
        }
    }
}

fn open_database(config: &Config) -> Result<jointline::Database> {
    let path = config.database_path();
    jointline::Database::open(&path).with_context(|| format!("opening database {:?}", path))
}

fn input_source(config: &Config) -> Result<Box<dyn jointline::input::InputSource>> {
    use jointline::input::InputSimulator;

    if config.simulate {
        info!("Using simulated input");
        return Ok(Box::new(InputSimulator::new("simulator", config.simulator.clone())));
    }

    #[cfg(feature = "serial")]
    {
        let port = config.io.port.as_deref().context("io.port is not set")?;
        return Ok(Box::new(jointline::input::ModbusInput::new(port, &config.io)));
    }

    #[cfg(not(feature = "serial"))]
    {
        anyhow::bail!("Serial support not enabled. Build with --features serial or run with --simulate");
    }
}

/// Wire every task together and run until Ctrl+C
async fn run_headless(config: Config) -> Result<()> {
    use jointline::core::{Clock, SystemClock};
    use jointline::input::InputManager;
    use jointline::security::{AuditEvent, AuditEventType, AuditLog, ResetAuthorizer};
    use jointline::{
        BroadcastScheduler, Broadcaster, Engine, EventBus, PersistenceWriter, SessionStateManager, SnapshotBuilder,
        StreamingManager,
    };
    use tokio::sync::broadcast;
    use tokio::time::Duration;

    let store = Arc::new(open_database(&config)?);

    let bus = Arc::new(EventBus::default());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (writer, writer_handle) = PersistenceWriter::new(store.clone(), bus.clone(), config.machine_id, &config.database);
    let writer_task = tokio::spawn(writer.run(shutdown_tx.subscribe()));

    let audit = Arc::new(AuditLog::new());
    let authorizer = ResetAuthorizer::new(&config.security);
    let authorizer = if config.security.audit_logging {
        authorizer.with_audit(audit.clone())
    } else {
        authorizer
    };
    if !authorizer.is_configured() {
        warn!("No reset PIN configured; resets are disabled. Set security.reset_pin_hash from `jointline hash-pin`");
    }

    let sessions = SessionStateManager::new(store.clone(), writer_handle, authorizer, config.machine_id);
    let input = InputManager::new(input_source(&config)?, &config.io);
    let (engine, handle, status_rx) = Engine::new(&config, input, sessions, bus.clone(), clock.clone())?;

    let mut streaming = StreamingManager::new(config.streaming.clone(), config.machine_id, handle).await?;
    streaming.start(shutdown_tx.subscribe()).await?;
    let broadcaster: Arc<dyn Broadcaster> = Arc::new(streaming);

    let builder = SnapshotBuilder::new(
        store.clone(),
        config.shift_clock()?,
        config.machine_id,
        config.oee.default_daily_target_m,
    );
    let scheduler = BroadcastScheduler::new(
        builder,
        broadcaster,
        status_rx,
        bus.subscribe(),
        clock.clone(),
        Duration::from_secs(config.streaming.broadcast_interval_secs),
        Duration::from_secs(config.io.stale_after_secs),
    );

    let engine_task = tokio::spawn(engine.run(shutdown_tx.subscribe()));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    audit.log(AuditEvent {
        timestamp: clock.now(),
        event_type: AuditEventType::SystemStart,
        description: format!("jointline v{} started", VERSION),
        success: true,
    });
    info!("jointline running, press Ctrl+C to shut down");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, cleaning up...");

    let _ = shutdown_tx.send(());
    let _ = engine_task.await;
    let _ = scheduler_task.await;
    // Writes queued before shutdown are drained before this returns
    let _ = writer_task.await;

    audit.log(AuditEvent {
        timestamp: clock.now(),
        event_type: AuditEventType::SystemStop,
        description: "jointline stopped".to_string(),
        success: true,
    });
    info!("jointline shutdown complete");

    Ok(())
}
