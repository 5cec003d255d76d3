//! WebSocket event source for the server's `/gateway` endpoint.
//!
//! Each subscription owns one connection task. The task identifies, waits
//! for `Ready`, subscribes to its room and forwards events until the
//! subscription goes away. [`GatewayEventSource::subscribe`] returns only
//! once the server has acknowledged the room, so anything posted afterwards
//! is delivered. Dropped connections are retried with backoff and announced
//! with [`SourceEvent::Reconnected`] once back.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use archevault_types::events::{GatewayCommand, GatewayEvent};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::source::{EventSource, SourceEvent, Subscription};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connect, Identify, Ready, Subscribe and its acknowledgement.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GatewayEventSource {
    url: String,
    token: String,
}

impl GatewayEventSource {
    pub fn new(config: &ClientConfig, token: &str) -> Self {
        Self {
            url: config.gateway_url.clone(),
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl EventSource for GatewayEventSource {
    /// Fails when the first connection cannot be established or the server
    /// does not grant the room.
    async fn subscribe(&self, room_id: Uuid) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(run_subscription(
            self.url.clone(),
            self.token.clone(),
            room_id,
            tx,
            ready_tx,
            cancel_rx,
        ));
        match ready_rx.await {
            Ok(Ok(())) => Ok(Subscription::new(room_id, rx, Some(cancel_tx))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ClientError::Closed),
        }
    }
}

async fn run_subscription(
    url: String,
    token: String,
    room_id: Uuid,
    tx: mpsc::UnboundedSender<SourceEvent>,
    ready: oneshot::Sender<Result<()>>,
    mut cancel: oneshot::Receiver<()>,
) {
    let first = tokio::select! {
        _ = &mut cancel => return,
        result = handshake(&url, &token, room_id, &tx) => result,
    };
    let mut socket = match first {
        Ok(ws) => Some(ws),
        Err(e) => {
            warn!("Gateway subscription for room {} failed: {}", room_id, e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut backoff = INITIAL_BACKOFF;
    loop {
        let session = match socket.take() {
            Some(ws) => Ok(ws),
            None => {
                let result = tokio::select! {
                    _ = &mut cancel => break,
                    result = handshake(&url, &token, room_id, &tx) => result,
                };
                // Pushes may have been missed while the channel was down.
                if result.is_ok() && tx.send(SourceEvent::Reconnected).is_err() {
                    break;
                }
                result
            }
        };

        match session {
            Ok(ws) => {
                let end = tokio::select! {
                    _ = &mut cancel => break,
                    end = forward(ws, &tx) => end,
                };
                match end {
                    ConnectionEnd::Stopped => break,
                    ConnectionEnd::Dropped => backoff = INITIAL_BACKOFF,
                }
            }
            Err(ClientError::SubscriptionRefused(_)) => {
                warn!("Gateway no longer grants room {}, giving up", room_id);
                break;
            }
            Err(e) => warn!("Gateway connection for room {} failed: {}", room_id, e),
        }

        if tx.is_closed() {
            break;
        }
        debug!("Reconnecting to gateway in {:?}", backoff);
        tokio::select! {
            _ = &mut cancel => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
    debug!("Gateway subscription for room {} stopped", room_id);
}

enum ConnectionEnd {
    /// The subscriber went away.
    Stopped,
    /// The server closed or the socket failed after a successful handshake.
    Dropped,
}

async fn handshake(
    url: &str,
    token: &str,
    room_id: Uuid,
    tx: &mpsc::UnboundedSender<SourceEvent>,
) -> Result<Socket> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, open(url, token, room_id, tx))
        .await
        .map_err(|_| ClientError::HandshakeTimeout)?
}

async fn open(
    url: &str,
    token: &str,
    room_id: Uuid,
    tx: &mpsc::UnboundedSender<SourceEvent>,
) -> Result<Socket> {
    let (mut ws, _) = connect_async(url).await?;

    send_command(&mut ws, &GatewayCommand::Identify {
        token: token.to_string(),
    })
    .await?;

    // Wait for Ready before subscribing.
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                if let Ok(GatewayEvent::Ready { wallet, .. }) = serde_json::from_str(text.as_str()) {
                    info!("Gateway ready for {}", wallet);
                    break;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => return Err(ClientError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }

    send_command(&mut ws, &GatewayCommand::Subscribe {
        room_ids: vec![room_id],
    })
    .await?;

    // Presence snapshots arrive ahead of the acknowledgement; pass them on.
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                    Ok(GatewayEvent::Subscribed { room_ids }) if room_ids.contains(&room_id) => {
                        return Ok(ws);
                    }
                    Ok(GatewayEvent::Subscribed { .. }) => {
                        return Err(ClientError::SubscriptionRefused(room_id));
                    }
                    Ok(event) => {
                        let _ = tx.send(SourceEvent::Event(event));
                    }
                    Err(e) => warn!("Unreadable gateway event: {}", e),
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => return Err(ClientError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn forward(mut ws: Socket, tx: &mpsc::UnboundedSender<SourceEvent>) -> ConnectionEnd {
    // Pings are answered by tungstenite while reading.
    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("Gateway socket error: {}", e);
                break;
            }
        };
        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
            Ok(event) => {
                if tx.send(SourceEvent::Event(event)).is_err() {
                    let _ = ws.close(None).await;
                    return ConnectionEnd::Stopped;
                }
            }
            Err(e) => warn!("Unreadable gateway event: {}", e),
        }
    }
    ConnectionEnd::Dropped
}

async fn send_command<S>(ws: &mut S, command: &GatewayCommand) -> Result<()>
where
    S: Sink<WsMessage> + Unpin,
    ClientError: From<S::Error>,
{
    let text = serde_json::to_string(command)?;
    ws.send(WsMessage::text(text)).await?;
    Ok(())
}
