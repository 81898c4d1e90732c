//! WebSocket Server
//!
//! Real-time surface: clients join/leave rooms and receive
//! `score:update` / `leaderboard:update` events in commit order.
//! Each connection gets one writer task; room events are forwarded
//! from the per-subscriber channel, so a slow socket only ever drops
//! its own events.

use crate::{events::RoomEvent, rooms::RoomRegistry, rooms::SubscriberId};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Client -> server control message
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Join { room: String },
    Leave { room: String },
}

/// WebSocket server
pub struct WebSocketServer {
    rooms: Arc<RoomRegistry>,
}

impl WebSocketServer {
    pub fn new(rooms: Arc<RoomRegistry>) -> Self {
        Self { rooms }
    }

    /// Run the WebSocket server
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("WebSocket server listening on {}", addr);

        while let Ok((stream, peer_addr)) = listener.accept().await {
            let rooms = self.rooms.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, rooms).await {
                    tracing::warn!("WebSocket connection error from {}: {}", peer_addr, e);
                }
            });
        }

        Ok(())
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(stream: TcpStream, rooms: Arc<RoomRegistry>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Single writer: both command replies and forwarded room events
    // funnel through this channel
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // Rooms this connection has joined, with their forward tasks
    let mut joined: HashMap<String, (SubscriberId, tokio::task::JoinHandle<()>)> = HashMap::new();

    while let Some(msg) = ws_receiver.next().await {
        let msg = msg?;

        if let Message::Text(text) = msg {
            let request: ClientMessage = match serde_json::from_str(&text) {
                Ok(req) => req,
                Err(_) => {
                    let reply = json!({"error": "unrecognized message"});
                    let _ = out_tx.try_send(Message::Text(reply.to_string()));
                    continue;
                }
            };

            match request {
                ClientMessage::Join { room } => {
                    if joined.contains_key(&room) {
                        continue;
                    }

                    let (sub_id, mut receiver) = rooms.join(&room);
                    let forward_tx = out_tx.clone();
                    let forward = tokio::spawn(async move {
                        while let Some(event) = receiver.recv().await {
                            let Ok(text) = serde_json::to_string(&event) else {
                                continue;
                            };
                            // Writer backpressure drops for this
                            // subscriber only
                            let _ = forward_tx.try_send(Message::Text(text));
                        }
                    });

                    joined.insert(room.clone(), (sub_id, forward));
                    let reply = json!({"result": "joined", "room": room});
                    let _ = out_tx.try_send(Message::Text(reply.to_string()));
                }

                ClientMessage::Leave { room } => {
                    if let Some((sub_id, forward)) = joined.remove(&room) {
                        rooms.leave(&room, sub_id);
                        forward.abort();
                    }
                    let reply = json!({"result": "left", "room": room});
                    let _ = out_tx.try_send(Message::Text(reply.to_string()));
                }
            }
        }
    }

    // Clean up room membership on disconnect
    for (room, (sub_id, forward)) in joined {
        rooms.leave(&room, sub_id);
        forward.abort();
    }
    writer.abort();

    Ok(())
}
