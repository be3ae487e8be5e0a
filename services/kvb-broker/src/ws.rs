//! Connection lifecycle (C7): upgrade, welcome, read loop, outbound writer,
//! keep-alive sweep, teardown. A single `tokio::select!` loop races inbound
//! frames against a heartbeat interval, with a side channel (the session's
//! own outbound queue) merged into the same select.

use crate::dispatcher;
use crate::platform;
use crate::session::{Outbound, SessionHandle};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use kvb_protocol::{now_millis, Envelope, Notification};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_GRACE_PERIODS: u32 = 2;

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let platform = platform::detect(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, platform))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, platform: kvb_protocol::Platform) {
    let client_id = Uuid::new_v4().to_string();
    let (session, mut outbound_rx) = SessionHandle::new(client_id.clone(), platform.clone());
    let session = Arc::new(session);
    state.subscriptions.register(session.clone()).await;
    info!(client_id = %client_id, platform = platform.as_str(), "client connected");

    let welcome = Notification::ConnectionEstablished {
        client_id: client_id.clone(),
        platform: platform.as_str().to_owned(),
        capabilities: platform.capabilities().iter().map(|s| (*s).to_owned()).collect(),
        timestamp: now_millis(),
    };
    if send_notification(&mut socket, &welcome).await.is_err() {
        state.subscriptions.unregister(&client_id).await;
        return;
    }

    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;
    let mut missed_beats = 0u32;

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        session.mark_alive();
                        missed_beats = 0;
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => {
                                let response = dispatcher::dispatch(&state, &session, envelope).await;
                                if send_envelope(&mut socket, &response).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let response = Envelope::error(None, format!("invalid JSON: {e}"));
                                if send_envelope(&mut socket, &response).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.mark_alive();
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.mark_alive();
                        missed_beats = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client_id = %client_id, "client disconnected");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(client_id = %client_id, "ignoring unexpected binary frame");
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %client_id, error = %e, "WS read error");
                        break;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Envelope(envelope)) => {
                        if send_envelope(&mut socket, &envelope).await.is_err() { break; }
                    }
                    Some(Outbound::Notification(notification)) => {
                        if send_notification(&mut socket, &notification).await.is_err() { break; }
                    }
                    Some(Outbound::Ping) => {
                        if socket.send(Message::Ping(Vec::new().into())).await.is_err() { break; }
                    }
                    Some(Outbound::Close) | None => break,
                }
            }
            _ = keepalive.tick() => {
                missed_beats += 1;
                if missed_beats > KEEPALIVE_GRACE_PERIODS {
                    warn!(client_id = %client_id, "keep-alive timed out, closing session");
                    session.mark_dead();
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.subscriptions.unregister(&client_id).await;
    info!(client_id = %client_id, "session torn down");
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    let json = serde_json::to_string(envelope).expect("envelope always serializes");
    socket.send(Message::Text(json.into())).await
}

async fn send_notification(socket: &mut WebSocket, notification: &Notification) -> Result<(), axum::Error> {
    let json = serde_json::to_string(notification).expect("notification always serializes");
    socket.send(Message::Text(json.into())).await
}
