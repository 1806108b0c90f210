//! Per-connection read and write pumps.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use lanshare_protocol::constants::{
    WS_MAX_FRAME_SIZE, WS_PING_INTERVAL, WS_READ_TIMEOUT, WS_WRITE_TIMEOUT,
};
use lanshare_protocol::{DecodeError, WireMessage, now_ts};

use crate::client::Client;
use crate::hub::Hub;

/// Drives one upgraded socket until it dies.
///
/// Registers a [`Client`] with the hub, runs the read pump on this
/// task and the write pump on a sibling task, and unregisters when
/// either side exits. `device_name` is the identity attached to the
/// validated credential; an inbound hello may change it later.
pub async fn serve_connection(socket: WebSocket, hub: Hub, device_name: String) {
    let id = Uuid::new_v4().to_string();
    let (client, outbound_rx) = Client::new(id.clone(), device_name);
    let client = Arc::new(client);
    let cancel = client.cancel_token();

    let (sink, stream) = socket.split();
    // Control frames (pong replies) bypass the application queue so a
    // full queue never breaks low-level liveness.
    let (control_tx, control_rx) = mpsc::channel(8);

    hub.register(Arc::clone(&client)).await;

    let writer = tokio::spawn(write_pump(sink, outbound_rx, control_rx, cancel.clone()));
    read_pump(stream, &client, &hub, control_tx, cancel.clone()).await;

    hub.unregister(&id).await;
    cancel.cancel();
    let _ = writer.await;
    debug!(client_id = %id, "connection closed");
}

/// Reads frames until error, close or read timeout.
///
/// Any inbound frame resets the read deadline; pong control frames
/// and decodable data frames also refresh the hub-visible liveness
/// timestamp.
async fn read_pump<S>(
    mut stream: S,
    client: &Arc<Client>,
    hub: &Hub,
    control_tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_READ_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!(client_id = %client.id(), "read timeout, closing connection");
                break;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(frame)) => {
                        deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + WS_READ_TIMEOUT);

                        match frame {
                            Message::Text(text) => {
                                handle_frame(text.as_str(), client, hub).await;
                            }
                            Message::Ping(data) => {
                                trace!(client_id = %client.id(), "ping, replying pong");
                                client.touch();
                                let _ = control_tx.send(Message::Pong(data)).await;
                            }
                            Message::Pong(_) => {
                                trace!(client_id = %client.id(), "pong");
                                client.touch();
                            }
                            Message::Close(_) => {
                                debug!(client_id = %client.id(), "close frame");
                                break;
                            }
                            Message::Binary(_) => {} // not part of the protocol
                        }
                    }
                    Some(Err(e)) => {
                        debug!(client_id = %client.id(), "socket error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Decodes one data frame and dispatches by type.
///
/// Decode failures and unknown tags are logged and dropped; they
/// never close the connection.
async fn handle_frame(text: &str, client: &Arc<Client>, hub: &Hub) {
    if text.len() > WS_MAX_FRAME_SIZE {
        warn!(client_id = %client.id(), len = text.len(), "frame too large, dropping");
        return;
    }

    let mut msg = match WireMessage::decode(text) {
        Ok(m) => m,
        Err(DecodeError::UnknownType(tag)) => {
            warn!(client_id = %client.id(), %tag, "unknown message type");
            return;
        }
        Err(DecodeError::Json(e)) => {
            warn!(client_id = %client.id(), "malformed frame: {e}");
            return;
        }
    };
    client.touch();

    match &msg {
        WireMessage::Hello { device, .. } => {
            if !device.is_empty() {
                client.set_device_name(device.clone());
            }
            debug!(client_id = %client.id(), device = %client.device_name(), "client identified");
            hub.broadcast(WireMessage::presence(client.device_name())).await;
        }
        WireMessage::Chat { .. }
        | WireMessage::FileOfferAck { .. }
        | WireMessage::DeliveryAck { .. }
        | WireMessage::Typing { .. } => {
            msg.stamp(&client.device_name(), now_ts());
            hub.broadcast(msg).await;
        }
        WireMessage::Ping { .. } => {
            trace!(client_id = %client.id(), "liveness probe answered");
        }
        // Server-originated types are never accepted from clients.
        WireMessage::FileOffer { .. } | WireMessage::Presence { .. } => {
            warn!(
                client_id = %client.id(),
                msg_type = msg.tag(),
                "server-originated type from client, dropping"
            );
        }
    }
}

/// Drains the outbound queue onto the socket, interleaving pong
/// replies and a periodic WebSocket-level ping. Every send carries a
/// write deadline; exceeding it is a socket error and ends the pump.
async fn write_pump<K>(
    mut sink: K,
    mut outbound_rx: mpsc::Receiver<WireMessage>,
    mut control_rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    let mut ping = tokio::time::interval(WS_PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.reset();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            msg = outbound_rx.recv() => {
                let Some(msg) = msg else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("failed to encode outbound message: {e}");
                        continue;
                    }
                };
                if send_with_deadline(&mut sink, Message::Text(json)).await.is_err() {
                    break;
                }
            }

            frame = control_rx.recv() => {
                let Some(frame) = frame else { break };
                if send_with_deadline(&mut sink, frame).await.is_err() {
                    break;
                }
            }

            _ = ping.tick() => {
                if send_with_deadline(&mut sink, Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_with_deadline<K>(sink: &mut K, frame: Message) -> Result<(), ()>
where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(WS_WRITE_TIMEOUT, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("write failed: {e}");
            Err(())
        }
        Err(_) => {
            warn!("write deadline exceeded");
            Err(())
        }
    }
}
