use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use meridian_db::Database;
use meridian_types::api::Claims;
use meridian_types::events::{GatewayCommand, GatewayEvent};

use crate::registry::Registry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The first frame must be Identify with a valid token within this bound,
/// or the socket is closed before registry admission.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection: Identify handshake, registry
/// admission, then the send/recv event loop until disconnect.
pub async fn handle_connection(
    socket: WebSocket,
    registry: Registry,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with a valid JWT. Fails closed.
    let claims = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(claims) => claims,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };
    let user_id = claims.sub;
    let username = claims.username.clone();

    info!("{} ({}) connected to gateway", username, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    run_connection_loop(sender, receiver, registry, db, claims).await;
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    registry: Registry,
    db: Arc<Database>,
    claims: Claims,
) {
    let user_id = claims.sub;
    let username = claims.username;

    // The identity binding is fixed for the connection's lifetime; admins
    // auto-join the admin broadcast channel here.
    let (conn_id, mut event_rx) = registry.register(user_id, claims.is_admin).await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Spawn task to forward registry events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
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
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let registry_recv = registry.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&registry_recv, &db, conn_id, user_id, &username_recv, cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
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

    // Single release point for every subscription this connection held.
    registry.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Claims> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
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
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    registry: &Registry,
    db: &Arc<Database>,
    conn_id: Uuid,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::SubscribeThread { thread_id } => {
            // Participant check runs against the db at subscribe time, not
            // from any cached state. Non-participants are silently ignored.
            let db = db.clone();
            let tid = thread_id.to_string();
            let thread = match tokio::task::spawn_blocking(move || db.get_thread(&tid)).await {
                Ok(Ok(thread)) => thread,
                Ok(Err(e)) => {
                    warn!("thread lookup failed for subscribe: {}", e);
                    return;
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                    return;
                }
            };

            let uid = user_id.to_string();
            match thread {
                Some(row) if row.participant_a == uid || row.participant_b == uid => {
                    info!("{} ({}) subscribed to thread {}", username, user_id, thread_id);
                    registry.subscribe(conn_id, thread_id).await;
                }
                Some(_) => {
                    warn!(
                        "{} ({}) tried to subscribe to thread {} without membership",
                        username, user_id, thread_id
                    );
                }
                None => {
                    warn!(
                        "{} ({}) tried to subscribe to unknown thread {}",
                        username, user_id, thread_id
                    );
                }
            }
        }
    }
}
