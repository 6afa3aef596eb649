//! WebSocket API handler and per-connection dispatch.

use crate::auth::{AuthOutcome, LoginSubmission};
use crate::relay::Publish;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use palaver_types::{ClientEvent, ServerEvent};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;

/// Bounded outbound queue per session. Beyond this the client is too slow
/// and frames are dropped.
const SESSION_QUEUE_DEPTH: usize = 256;

/// How much global history a joining monitor is primed with.
const MONITOR_HISTORY_LIMIT: usize = 256;

/// WebSocket handler: `GET /ws`. Connections start unverified; the client
/// authenticates over the socket itself.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    tracing::info!(remote_addr = %addr, "websocket connected");
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Handles one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded channel so a slow consumer cannot grow memory without bound.
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_QUEUE_DEPTH);
    let session = state.relay.registry.open(addr, tx.clone());

    // Forward queued frames to the socket until either side closes.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(AxumMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => dispatch(&state, session, addr, event).await,
                    Err(err) => {
                        tracing::warn!(remote_addr = %addr, error = %err, "unparseable client event");
                    }
                }
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    state.relay.registry.close(session);
    state.relay.broadcast_roster();
    send_task.abort();
    tracing::info!(remote_addr = %addr, "websocket disconnected");
}

async fn dispatch(
    state: &Arc<AppState>,
    session: crate::registry::SessionId,
    addr: SocketAddr,
    event: ClientEvent,
) {
    match event {
        ClientEvent::RequestVerificationCode => {
            let code = state.auth.issue_code(addr.ip());
            tracing::info!(remote_addr = %addr, "verification code issued");
            state
                .relay
                .send_to(session, &ServerEvent::SystemSendCode { code });
        }
        ClientEvent::SubmitLoginVerify {
            username,
            password,
            code,
            uid,
            token,
        } => {
            let submission = LoginSubmission {
                username,
                password,
                code,
                uid,
                token,
            };
            match state.auth.login(addr.ip(), submission) {
                Ok(AuthOutcome::Verified { user, token }) => {
                    state
                        .relay
                        .registry
                        .verify(session, &user.username, &user.uid, &user.avatar);
                    tracing::info!(uid = %user.uid, remote_addr = %addr, "session verified");
                    state.relay.send_to(
                        session,
                        &ServerEvent::VerificationSuccess {
                            username: user.username,
                            uid: user.uid,
                            avatar: user.avatar,
                            token: Some(token),
                        },
                    );
                    state.relay.broadcast_roster();
                }
                Ok(AuthOutcome::Registered { uid }) => {
                    tracing::info!(uid = %uid, remote_addr = %addr, "account registered");
                    state.relay.send_to(
                        session,
                        &ServerEvent::ShowNotification {
                            msg: format!("Registered! UID: {uid}"),
                        },
                    );
                }
                Ok(AuthOutcome::Failed(failure)) => {
                    state.relay.send_to(
                        session,
                        &ServerEvent::VerificationFailed {
                            msg: failure.to_string(),
                        },
                    );
                }
                Err(err) => {
                    tracing::error!(remote_addr = %addr, error = %err, "login failed internally");
                    state.relay.send_to(
                        session,
                        &ServerEvent::VerificationFailed {
                            msg: "Internal error".to_string(),
                        },
                    );
                }
            }
        }
        ClientEvent::Logout => {
            state.relay.registry.logout(session);
            state.relay.broadcast_roster();
        }
        ClientEvent::Message {
            content,
            kind,
            temp_id,
            target,
            quote,
        } => {
            state.relay.publish(
                session,
                Publish {
                    content,
                    kind,
                    temp_id,
                    target,
                    quote,
                },
            );
        }
        ClientEvent::Reaction {
            msg_id,
            reaction_kind,
            target,
        } => {
            state.relay.react(session, msg_id, reaction_kind, target);
        }
        ClientEvent::ChatHistory { target, limit } => {
            state.relay.fetch_history(session, target, limit);
        }
        ClientEvent::UpdateProfile {
            new_avatar,
            new_username,
            new_password,
        } => {
            state
                .relay
                .update_profile(session, new_username, new_password, new_avatar);
        }
        ClientEvent::CheckUser { username } => {
            state.relay.check_user(session, &username);
        }
        ClientEvent::MonitorJoin => {
            state.relay.registry.set_monitor(session);
            tracing::info!(remote_addr = %addr, "monitor joined");
            let messages = state.relay.monitor_history(MONITOR_HISTORY_LIMIT);
            state.relay.send_to(
                session,
                &ServerEvent::HistoryLoaded {
                    messages,
                    target: palaver_types::Target::Global,
                },
            );
            state.relay.send_to(
                session,
                &ServerEvent::UpdateUserList(state.relay.registry.roster()),
            );
            state.relay.broadcast_monitor_directory();
        }
        ClientEvent::MonitorMessage {
            target,
            content,
            kind,
        } => {
            state.relay.monitor_publish(session, target, content, kind);
        }
        ClientEvent::MonitorHistory { room, limit } => {
            state.relay.monitor_fetch_history(session, &room, limit);
        }
    }
}
