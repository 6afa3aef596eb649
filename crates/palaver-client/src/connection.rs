//! The persistent connection to the relay: reconnect loop, outbound pump
//! and server event dispatch.

use crate::bridge::ResponseKey;
use crate::ClientCore;
use futures_util::{SinkExt, StreamExt};
use palaver_types::{ClientEvent, ServerEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Runs forever: connect, serve the session, back off, reconnect. Pending
/// bridge waits are failed on every disconnect so HTTP callers do not run
/// out their full timeout against a dead connection.
pub async fn run(core: Arc<ClientCore>, mut outbound: mpsc::Receiver<ClientEvent>, url: String) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!(url = %url, "connected to relay");
                core.state.set_connected(true);
                backoff = INITIAL_BACKOFF;

                serve_session(&core, &mut outbound, ws).await;

                core.state.set_connected(false);
                core.bridge.fail_all();
                tracing::warn!(url = %url, "relay connection lost");
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "relay connect failed");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn serve_session<S>(
    core: &Arc<ClientCore>,
    outbound: &mut mpsc::Receiver<ClientEvent>,
    ws: tokio_tungstenite::WebSocketStream<S>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    // Resume the cached identity without a fresh code exchange.
    let cached = core
        .state
        .profile()
        .or_else(|| core.mirror.load_profile());
    if let Some(profile) = cached {
        if let Some(token) = profile.token {
            let reauth = ClientEvent::SubmitLoginVerify {
                username: None,
                password: None,
                code: None,
                uid: Some(profile.uid),
                token: Some(token),
            };
            if send_event(&mut sink, &reauth).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { return };
                if send_event(&mut sink, &event).await.is_err() {
                    return;
                }
            }
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else { return };
                match frame {
                    Message::Text(text) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => handle_event(core, event),
                            Err(err) => {
                                tracing::warn!(error = %err, "unparseable server event");
                            }
                        }
                    }
                    Message::Close(_) => return,
                    _ => {}
                }
            }
        }
    }
}

async fn send_event<S>(
    sink: &mut futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<S>, Message>,
    event: &ClientEvent,
) -> Result<(), ()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let frame = match serde_json::to_string(event) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize client event");
            return Ok(());
        }
    };
    sink.send(Message::Text(frame.into())).await.map_err(|err| {
        tracing::warn!(error = %err, "relay send failed");
    })
}

fn handle_event(core: &Arc<ClientCore>, event: ServerEvent) {
    match event {
        ServerEvent::VerificationSuccess {
            username,
            uid,
            avatar,
            token,
        } => {
            tracing::info!(uid = %uid, "identity verified");
            core.state
                .set_profile(username, uid.clone(), avatar, token);
            core.mirror.set_identity(&uid);
            if let Some(profile) = core.state.profile() {
                if let Err(err) = core.mirror.save_profile(&profile) {
                    tracing::warn!(error = %err, "failed to cache profile");
                }
            }
        }
        ServerEvent::VerificationFailed { msg } => {
            tracing::warn!(msg = %msg, "verification failed");
            core.state.push_notification(msg);
        }
        ServerEvent::SystemSendCode { code } => {
            core.state.set_last_code(code);
        }
        ServerEvent::ShowNotification { msg } => {
            core.state.push_notification(msg);
        }
        ServerEvent::ReceiveMessage(record) => {
            if let Err(err) = core.mirror.record(&record) {
                tracing::warn!(id = %record.id, error = %err, "failed to mirror live message");
            }
        }
        ServerEvent::ReactionUpdate { msg_id, reactions } => {
            tracing::debug!(msg_id = %msg_id, kinds = reactions.len(), "reaction update");
        }
        ServerEvent::HistoryLoaded { messages, target } => {
            core.mirror.record_batch(&messages);
            core.bridge.complete(
                &ResponseKey::history(&target),
                json!({"messages": messages, "target": target}),
            );
        }
        ServerEvent::UpdateUserList(roster) => {
            core.state.set_roster(roster);
        }
        // Monitor-only pushes; this daemon never joins as a monitor.
        ServerEvent::MonitorHistoryLoaded { .. } | ServerEvent::MonitorUserList(_) => {}
        ServerEvent::CheckUserResult {
            exists,
            uid,
            username,
            avatar,
        } => {
            core.bridge.complete(
                &ResponseKey::CheckUser,
                json!({
                    "exists": exists,
                    "uid": uid,
                    "username": username,
                    "avatar": avatar,
                }),
            );
        }
    }
}
