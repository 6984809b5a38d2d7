//! WebSocket handler for live room connections
//!
//! One task per socket. It selects over the connection's outbound queue,
//! inbound frames, the keep-alive interval and the idle deadline, and on any
//! exit other than an explicit leave hands the identity to the grace-period
//! path.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{AppState, ConnectionSettings};
use crate::auth::token_prefix;
use crate::connections::{
    Outbound, CLOSE_IDLE_TIMEOUT, CLOSE_INVALID_TOKEN, CLOSE_MISSING_TOKEN,
    CLOSE_TOO_MANY_FAILURES,
};
use crate::coordinator::{Coordinator, Session};
use crate::error::CoreError;
use crate::protocol::{ClientMessage, ProtocolError, ServerEvent};

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Handle WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

/// Why a connection loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Peer closed or the transport failed
    Closed,
    /// Explicit leave; membership already marked left
    Left,
    /// Closed by the server (supersession or shutdown)
    ClosedByServer,
    Idle,
    TooManyFailures,
}

async fn handle_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        close(&mut socket, CLOSE_MISSING_TOKEN, "Missing token").await;
        return;
    };

    let session = match state.coordinator.connect(&token).await {
        Ok(session) => session,
        Err(CoreError::Unauthorized) => {
            debug!(identity = token_prefix(&token), "rejected unknown token");
            close(&mut socket, CLOSE_INVALID_TOKEN, "Invalid token").await;
            return;
        }
        Err(e) => {
            warn!(identity = token_prefix(&token), "connect failed: {}", e);
            close(&mut socket, CLOSE_INTERNAL, "Internal error").await;
            return;
        }
    };

    info!(
        identity = token_prefix(&token),
        room_id = %session.player.room_id,
        superseded = session.registration.superseded,
        "WebSocket connected"
    );

    let Session {
        player,
        registration,
    } = session;
    let conn_id = registration.conn_id;

    let exit = run_connection(
        &mut socket,
        &state.coordinator,
        &state.settings,
        &token,
        registration.receiver,
    )
    .await;

    if exit == Exit::Left {
        if let Err(e) = state.coordinator.leave(&player, conn_id).await {
            warn!(identity = token_prefix(&token), "leave failed: {}", e);
        }
        close(&mut socket, CLOSE_NORMAL, "Left session").await;
    } else {
        state.coordinator.disconnect(&player, conn_id).await;
    }

    info!(identity = token_prefix(&token), ?exit, "WebSocket disconnected");
}

async fn run_connection(
    socket: &mut WebSocket,
    coordinator: &Coordinator,
    settings: &ConnectionSettings,
    identity: &str,
    mut outbound: tokio::sync::mpsc::Receiver<Outbound>,
) -> Exit {
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = sleep(settings.idle_timeout);
    tokio::pin!(idle);

    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            item = outbound.recv() => {
                match item {
                    Some(Outbound::Event(event)) => {
                        if !send_event(socket, &event).await {
                            return Exit::Closed;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        close(socket, code, &reason).await;
                        return Exit::ClosedByServer;
                    }
                    None => return Exit::ClosedByServer,
                }
            }
            frame = socket.recv() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(_))) => {
                        idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                        failures += 1;
                        if !send_event(socket, &ServerEvent::error(ProtocolError::InvalidJson.to_string())).await {
                            return Exit::Closed;
                        }
                        if failures >= settings.max_consecutive_failures {
                            close(socket, CLOSE_TOO_MANY_FAILURES, "Too many failures").await;
                            return Exit::TooManyFailures;
                        }
                        continue;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return Exit::Closed,
                };
                idle.as_mut().reset(Instant::now() + settings.idle_timeout);

                let reply = if text.len() > settings.max_message_bytes {
                    Err(ProtocolError::TooLarge.to_string())
                } else {
                    match ClientMessage::parse(text.as_str()) {
                        Ok(ClientMessage::Leave) => return Exit::Left,
                        Ok(message) => handle_message(coordinator, identity, message).await,
                        Err(e) => Err(e.to_string()),
                    }
                };

                match reply {
                    Ok(None) => failures = 0,
                    Ok(Some(rejection)) => {
                        failures = 0;
                        if !send_event(socket, &ServerEvent::error(rejection)).await {
                            return Exit::Closed;
                        }
                    }
                    Err(message) => {
                        failures += 1;
                        debug!(identity = token_prefix(identity), failures, "bad message: {}", message);
                        if !send_event(socket, &ServerEvent::error(message)).await {
                            return Exit::Closed;
                        }
                        if failures >= settings.max_consecutive_failures {
                            warn!(identity = token_prefix(identity), "closing after {} consecutive failures", failures);
                            close(socket, CLOSE_TOO_MANY_FAILURES, "Too many failures").await;
                            return Exit::TooManyFailures;
                        }
                    }
                }
            }
            _ = ping.tick() => {
                if !send_event(socket, &ServerEvent::Ping).await {
                    return Exit::Closed;
                }
            }
            _ = &mut idle => {
                debug!(identity = token_prefix(identity), "idle timeout");
                close(socket, CLOSE_IDLE_TIMEOUT, "Idle timeout").await;
                return Exit::Idle;
            }
        }
    }
}

/// Dispatch one decoded message.
///
/// `Ok(None)` is success, `Ok(Some(reason))` a handled rejection to report
/// back, and `Err` a failure that counts towards the disconnect threshold.
async fn handle_message(
    coordinator: &Coordinator,
    identity: &str,
    message: ClientMessage,
) -> Result<Option<String>, String> {
    let result = match message {
        ClientMessage::RollDice { dice, reason, mode } => coordinator
            .roll_dice(identity, &dice, reason, mode)
            .await
            .map(|_| ()),
        ClientMessage::Chat { message } => coordinator.chat(identity, &message).await.map(|_| ()),
        ClientMessage::Pong => Ok(()),
        // run_connection intercepts leave before dispatch
        ClientMessage::Leave => Ok(()),
        ClientMessage::Unknown(kind) => {
            debug!(identity = token_prefix(identity), kind = %kind, "ignoring unknown message type");
            Ok(())
        }
    };

    match result {
        Ok(()) => Ok(None),
        Err(e) if e.is_rejection() => Ok(Some(e.to_string())),
        Err(e) => {
            warn!(identity = token_prefix(identity), "message handling failed: {}", e);
            Err("Internal error".to_string())
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("failed to encode {} event: {}", event.kind(), e);
            true
        }
    }
}

async fn close(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
