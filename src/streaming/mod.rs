// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Streaming module - WebSocket and MQTT fan-out of production snapshots

mod mqtt;
mod websocket;

pub use mqtt::*;
pub use websocket::*;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::analysis::ProductionSnapshot;
use crate::core::EngineHandle;
use crate::input::InputStatus;

/// Streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Snapshot cadence when nothing happens
    pub broadcast_interval_secs: u64,

    /// Enable MQTT
    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,

    /// Enable WebSocket server
    pub websocket_enabled: bool,
    pub websocket_port: u16,
    pub websocket_max_clients: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_secs: 5,

            mqtt_enabled: false,
            mqtt_broker: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: "jointline".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_topic_prefix: "jointline".to_string(),

            websocket_enabled: true,
            websocket_port: 8765,
            websocket_max_clients: 10,
        }
    }
}

/// Outbound side of the dashboard protocol
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish_snapshot(&self, snapshot: &ProductionSnapshot) -> Result<()>;

    /// Sent once per completed reset, after the zeroed snapshot
    async fn publish_reset_done(&self) -> Result<()>;

    async fn publish_input_status(&self, status: InputStatus) -> Result<()>;
}

/// Everything a [`Broadcaster`] can be asked to send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BroadcastMessage {
    ProductionUpdate { data: Box<ProductionSnapshot> },
    ResetDone,
    SensorStatus { status: InputStatus },
}

/// Feeds an mpsc receiver; for embedding the engine and for tests
pub struct ChannelBroadcaster {
    tx: mpsc::UnboundedSender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BroadcastMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, message: BroadcastMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| anyhow::anyhow!("broadcast receiver dropped"))
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn publish_snapshot(&self, snapshot: &ProductionSnapshot) -> Result<()> {
        self.send(BroadcastMessage::ProductionUpdate {
            data: Box::new(snapshot.clone()),
        })
    }

    async fn publish_reset_done(&self) -> Result<()> {
        self.send(BroadcastMessage::ResetDone)
    }

    async fn publish_input_status(&self, status: InputStatus) -> Result<()> {
        self.send(BroadcastMessage::SensorStatus { status })
    }
}

/// Streaming manager
pub struct StreamingManager {
    config: StreamingConfig,
    machine_id: u32,
    mqtt_client: Option<MqttClient>,
    websocket_server: Option<WebSocketServer>,
}

impl StreamingManager {
    pub async fn new(config: StreamingConfig, machine_id: u32, engine: EngineHandle) -> Result<Self> {
        let mqtt_client = if config.mqtt_enabled {
            Some(MqttClient::new(&config).await?)
        } else {
            None
        };

        let websocket_server = if config.websocket_enabled {
            Some(WebSocketServer::new(config.websocket_port, config.websocket_max_clients, engine))
        } else {
            None
        };

        Ok(Self {
            config,
            machine_id,
            mqtt_client,
            websocket_server,
        })
    }

    pub async fn start(&mut self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        if let Some(ref mqtt) = self.mqtt_client {
            mqtt.connect().await?;
        }

        if let Some(ref mut ws) = self.websocket_server {
            ws.start(shutdown).await?;
        }

        Ok(())
    }

    fn topic(&self, leaf: &str) -> String {
        format!("{}/{}/{}", self.config.mqtt_topic_prefix, self.machine_id, leaf)
    }

    async fn fan_out(&self, leaf: &str, message: &BroadcastMessage) -> Result<()> {
        if let Some(ref mqtt) = self.mqtt_client {
            if let Err(e) = mqtt.publish(&self.topic(leaf), message).await {
                warn!("MQTT publish failed: {}", e);
            }
        }

        if let Some(ref ws) = self.websocket_server {
            ws.broadcast(message)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Broadcaster for StreamingManager {
    async fn publish_snapshot(&self, snapshot: &ProductionSnapshot) -> Result<()> {
        let message = BroadcastMessage::ProductionUpdate {
            data: Box::new(snapshot.clone()),
        };
        self.fan_out("production", &message).await
    }

    async fn publish_reset_done(&self) -> Result<()> {
        self.fan_out("reset", &BroadcastMessage::ResetDone).await
    }

    async fn publish_input_status(&self, status: InputStatus) -> Result<()> {
        self.fan_out("input", &BroadcastMessage::SensorStatus { status }).await
    }
}
