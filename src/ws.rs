use crate::api::AppState;
use crate::auth;
use crate::db;
use crate::presence::ConnId;
use crate::users;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

/// Frames accepted from clients. Anything else is ignored.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Auth { user_id: Uuid },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
) -> Result<impl IntoResponse, crate::error::Error> {
    // identity comes from the verified token presented at upgrade time,
    // never from a client payload
    let user = claims.user_id()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

/// Unregisters the connection and mirrors the offline transition when the
/// socket task ends, however it ends: normal close, transport error, panic
/// or task cancellation all drop the guard.
struct ConnectionGuard {
    state: AppState,
    conn_id: Option<ConnId>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(conn_id) = self.conn_id.take() {
            let state = &self.state;
            if let Some((user, _)) = state
                .presence
                .unregister(conn_id, |user| persist_transition(state, user, false))
            {
                tracing::info!(user = %user, conn = conn_id, "connection closed");
            }
        }
    }
}

/// Per-connection lifecycle: Connected(anonymous) -> Authenticated -> Closed.
/// The auth frame must agree with the token identity before the connection
/// is registered for fan-out.
async fn handle_socket(stream: WebSocket, state: AppState, user: Uuid) {
    let (mut ws_tx, mut ws_rx) = stream.split();
    let (push_tx, push_rx) = mpsc::unbounded_channel::<String>();
    let mut push_rx = UnboundedReceiverStream::new(push_rx);
    let mut guard = ConnectionGuard {
        state: state.clone(),
        conn_id: None,
    };

    loop {
        tokio::select! {
            Some(frame) = push_rx.next() => {
                if ws_tx.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Auth { user_id }) => {
                                if user_id != user {
                                    tracing::warn!(claimed = %user_id, session = %user,
                                        "auth frame does not match session identity, ignoring");
                                    continue;
                                }
                                if guard.conn_id.is_none() {
                                    let (conn_id, _) =
                                        state.presence.register(user, push_tx.clone(), || {
                                            persist_transition(&state, user, true)
                                        });
                                    guard.conn_id = Some(conn_id);
                                    tracing::info!(user = %user, conn = conn_id, "connection authenticated");
                                }
                            }
                            Err(_) => {
                                tracing::debug!(user = %user, "ignoring unrecognized frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong/binary
                    Some(Err(e)) => {
                        tracing::debug!(user = %user, error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }

    // cleanup happens in ConnectionGuard::drop
}

/// Mirror an online/offline transition to the durable store. Presence
/// writes must never take down the socket task.
fn persist_transition(state: &AppState, user: Uuid, is_online: bool) {
    let result = state
        .pool
        .get()
        .map_err(crate::error::Error::from)
        .and_then(|conn| users::set_presence(&conn, user, is_online, db::now_millis()));
    if let Err(e) = result {
        tracing::warn!(user = %user, is_online, error = %e, "failed to persist presence transition");
    }
}
