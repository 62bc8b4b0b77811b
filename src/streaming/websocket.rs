// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! WebSocket server for dashboards and operator commands

use anyhow::Result;
use chrono::NaiveDate;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::BroadcastMessage;
use crate::core::EngineHandle;
use crate::security::ResetCredential;

/// WebSocket server
pub struct WebSocketServer {
    port: u16,
    max_clients: usize,
    clients: Arc<RwLock<HashMap<String, SocketAddr>>>,
    broadcast_tx: broadcast::Sender<String>,
    engine: EngineHandle,
}

/// Requests a dashboard may send
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientCommand {
    Ping,
    Reset {
        credential: ResetCredential,
    },
    Tally {
        hour: u32,
        meters: f64,
        #[serde(default)]
        date: Option<NaiveDate>,
    },
}

impl WebSocketServer {
    pub fn new(port: u16, max_clients: usize, engine: EngineHandle) -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);

        Self {
            port,
            max_clients,
            clients: Arc::new(RwLock::new(HashMap::new())),
            broadcast_tx,
            engine,
        }
    }

    /// Bind and spawn the accept loop. Returns the bound address, which
    /// differs from the configured one when port 0 was asked for.
    pub async fn start(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<SocketAddr> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        self.port = local_addr.port();

        info!("WebSocket server listening on ws://{}", local_addr);

        let clients = self.clients.clone();
        let max_clients = self.max_clients;
        let broadcast_tx = self.broadcast_tx.clone();
        let engine = self.engine.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                let client_count = clients.read().await.len();
                                if client_count >= max_clients {
                                    warn!("Max clients reached, rejecting connection from {}", addr);
                                    continue;
                                }

                                let clients = clients.clone();
                                let broadcast_rx = broadcast_tx.subscribe();
                                let engine = engine.clone();

                                tokio::spawn(handle_connection(stream, addr, clients, broadcast_rx, engine));
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("WebSocket server shutting down");
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    pub fn broadcast(&self, message: &BroadcastMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        // No connected clients is fine
        let _ = self.broadcast_tx.send(json);
        Ok(())
    }
}

/// Execute one client request and build the reply, if any
async fn handle_command(text: &str, engine: &EngineHandle) -> Option<Value> {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            debug!("Unrecognised client message: {}", e);
            return Some(json!({"type": "error", "message": format!("invalid command: {}", e)}));
        }
    };

    match command {
        ClientCommand::Ping => Some(json!({"type": "pong"})),
        ClientCommand::Reset { credential } => {
            let reply = match engine.reset(credential).await {
                Ok(summary) => json!({
                    "type": "resetResult",
                    "ok": true,
                    "productionDate": summary.production_date,
                }),
                Err(e) => json!({"type": "resetResult", "ok": false, "error": e.to_string()}),
            };
            Some(reply)
        }
        ClientCommand::Tally { hour, meters, date } => {
            let reply = match engine.tally(date, hour, meters).await {
                Ok(date) => json!({"type": "tallyResult", "ok": true, "date": date, "hour": hour}),
                Err(e) => json!({"type": "tallyResult", "ok": false, "error": e.to_string()}),
            };
            Some(reply)
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<RwLock<HashMap<String, SocketAddr>>>,
    mut broadcast_rx: broadcast::Receiver<String>,
    engine: EngineHandle,
) {
    let client_id = uuid::Uuid::new_v4().to_string();

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    info!("New WebSocket connection from {} (id: {})", addr, client_id);
    clients.write().await.insert(client_id.clone(), addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let welcome = json!({
        "type": "welcome",
        "clientId": client_id,
        "server": "jointline",
        "version": env!("CARGO_PKG_VERSION"),
    });

    if let Err(e) = ws_sender.send(Message::Text(welcome.to_string().into())).await {
        warn!("Failed to send welcome: {}", e);
    }

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from {}: {} bytes", addr, text.len());

                        if let Some(reply) = handle_command(&text, &engine).await {
                            if let Err(e) = ws_sender.send(Message::Text(reply.to_string().into())).await {
                                warn!("Failed to reply to {}: {}", addr, e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by client {}", addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(json) => {
                        if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                            warn!("Failed to send to {}: {}", addr, e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // The next snapshot supersedes what was skipped
                        debug!("Client {} lagged by {} messages", addr, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    clients.write().await.remove(&client_id);
    info!("WebSocket client {} disconnected", addr);
}
