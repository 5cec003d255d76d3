use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use archevault_db::Database;
use archevault_types::api::Claims;
use archevault_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket has to send Identify.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a gateway connection needs from the server.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

type Subscriptions = Arc<std::sync::RwLock<HashSet<Uuid>>>;

/// Handle a single WebSocket connection: Identify handshake, then the
/// event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let claims = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };
    let user_id = claims.sub;

    info!("{} ({}) connected to gateway", claims.wallet, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        wallet: claims.wallet.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, ctx, user_id, claims.wallet).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| {
        error!("Failed to serialize gateway event: {}", e);
    })?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    ctx: GatewayContext,
    user_id: Uuid,
    wallet: String,
) {
    let dispatcher = ctx.dispatcher.clone();

    // Register per-user channel and send existing online users, then go online
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    for (uid, status) in dispatcher.online_users().await {
        let event = GatewayEvent::PresenceUpdate {
            user_id: uid,
            status,
        };
        if send_event(&mut sender, &event).await.is_err() {
            dispatcher.unregister_user_channel(user_id, conn_id).await;
            return;
        }
    }

    // Now mark ourselves online (broadcasts to everyone else)
    dispatcher.user_online(user_id).await;

    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection room subscriptions (shared between send and recv tasks).
    let subscribed_rooms: Subscriptions = Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_subscriptions = subscribed_rooms.clone();

    // Replies meant for this connection only.
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(room_id) = msg.room_id {
                        let subscribed = send_subscriptions
                            .read()
                            .map(|subs| subs.contains(&room_id))
                            .unwrap_or(false);
                        if !subscribed {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Some(event) = direct_rx.recv() => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_ctx = ctx.clone();
    let recv_wallet = wallet.clone();
    let recv_subscriptions = subscribed_rooms.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &recv_ctx,
                            user_id,
                            &recv_wallet,
                            cmd,
                            &recv_subscriptions,
                            &direct_tx,
                        )
                        .await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("{} ({}) bad command: {} -- raw: {}", recv_wallet, user_id, e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", wallet, user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg
                && let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
            {
                let token_data = decode::<Claims>(
                    &token,
                    &DecodingKey::from_secret(jwt_secret.as_bytes()),
                    &Validation::default(),
                )
                .ok()?;

                return Some(token_data.claims);
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

async fn handle_command(
    ctx: &GatewayContext,
    user_id: Uuid,
    wallet: &str,
    cmd: GatewayCommand,
    subscriptions: &Subscriptions,
    direct: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { room_ids } => {
            let allowed = accessible_rooms(ctx, user_id, room_ids).await;
            info!("{} ({}) subscribing to {} rooms", wallet, user_id, allowed.len());
            match subscriptions.write() {
                Ok(mut subs) => *subs = allowed.iter().copied().collect(),
                Err(e) => {
                    error!("Subscription lock poisoned: {}", e);
                    return;
                }
            }
            // Delivery for these rooms is live from here on.
            let _ = direct.send(GatewayEvent::Subscribed { room_ids: allowed });
        }

        GatewayCommand::StartTyping { room_id } => {
            let subscribed = subscriptions
                .read()
                .map(|subs| subs.contains(&room_id))
                .unwrap_or(false);
            if subscribed {
                ctx.dispatcher
                    .broadcast(GatewayEvent::TypingStart { room_id, user_id });
            }
        }

        GatewayCommand::SetPresence { status } => {
            ctx.dispatcher.set_presence(user_id, status).await;
        }
    }
}

/// Filters `room_ids` down to rooms that exist and are public or joined.
async fn accessible_rooms(ctx: &GatewayContext, user_id: Uuid, room_ids: Vec<Uuid>) -> Vec<Uuid> {
    let db = ctx.db.clone();
    let uid = user_id.to_string();
    let result = tokio::task::spawn_blocking(move || {
        let mut allowed = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            let rid = room_id.to_string();
            let Some(room) = db.get_room(&rid)? else {
                continue;
            };
            if !room.is_private || db.is_member(&rid, &uid)? {
                allowed.push(room_id);
            }
        }
        Ok::<_, anyhow::Error>(allowed)
    })
    .await;

    match result {
        Ok(Ok(allowed)) => allowed,
        Ok(Err(e)) => {
            error!("Room access check failed for {}: {}", user_id, e);
            Vec::new()
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            Vec::new()
        }
    }
}
