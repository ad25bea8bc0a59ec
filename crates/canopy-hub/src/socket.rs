use crate::hub::{HubHandle, CLIENT_QUEUE_CAPACITY};
use axum::extract::ws::{Message, WebSocket};
use canopy_core::wire::{ClientMessage, HubMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Keepalive cadence on otherwise-idle connections.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Drives one accepted websocket connection: registers it with the hub,
/// splits it into a reader and a writer task, and unregisters on teardown.
pub async fn handle_socket(socket: WebSocket, hub: HubHandle) {
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
    let conn_id = hub.register(tx).await;

    let write_task = tokio::spawn(write_loop(ws_sender, rx));
    read_loop(ws_receiver, &hub, conn_id).await;

    // Unregistering closes the outbound queue, which ends the writer.
    hub.unregister(conn_id).await;
    let _ = write_task.await;
}

/// Decodes inbound control messages. Read errors, close frames, and decode
/// failures all tear the connection down.
async fn read_loop(mut receiver: SplitStream<WebSocket>, hub: &HubHandle, conn_id: u64) {
    while let Some(result) = receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!(event = "read_error", conn_id, error = %err);
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(event = "message_invalid", conn_id, error = "not utf-8");
                    break;
                }
            },
            Message::Close(_) => {
                info!(event = "client_close", conn_id);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Subscribe(topics)) => {
                hub.subscribe(conn_id, topics).await;
            }
            Err(err) => {
                warn!(event = "message_invalid", conn_id, error = %err);
                break;
            }
        }
    }
}

/// Drains the outbound queue to the wire and keeps the connection alive with
/// periodic pings. Ends when the queue closes or a send fails.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<HubMessage>,
) {
    let first_ping = tokio::time::Instant::now() + PING_INTERVAL;
    let mut ping = tokio::time::interval_at(first_ping, PING_INTERVAL);
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    break;
                };
                if send_json(&mut sender, &message).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if send_json(&mut sender, &HubMessage::Ping).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &HubMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => sender.send(Message::Text(text)).await,
        Err(err) => {
            // An unencodable message is dropped; the connection stays up.
            error!(event = "encode_error", error = %err);
            Ok(())
        }
    }
}
