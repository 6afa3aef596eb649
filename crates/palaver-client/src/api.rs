//! The local HTTP surface consumed by the UI layer.
//!
//! Every handler either passes an event through to the relay connection or
//! reads local state. The two bridged calls (`request_history`,
//! `check_user`) register their wait *before* emitting, then block only the
//! calling request while the response arrives on the event stream.

use crate::bridge::{BridgeError, ResponseKey, CHECK_USER_TIMEOUT, HISTORY_TIMEOUT};
use crate::ClientCore;
use axum::{extract::Extension, http::StatusCode, Json};
use palaver_types::{ClientEvent, MessageKind, Target};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn error(status: StatusCode, msg: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({"error": msg})))
}

async fn emit(core: &Arc<ClientCore>, event: ClientEvent) -> Result<(), (StatusCode, Json<Value>)> {
    core.outbound
        .send(event)
        .await
        .map_err(|_| error(StatusCode::SERVICE_UNAVAILABLE, "connection task gone"))
}

fn bridge_error(err: BridgeError) -> (StatusCode, Json<Value>) {
    match err {
        BridgeError::Timeout => error(StatusCode::GATEWAY_TIMEOUT, "relay did not answer in time"),
        BridgeError::Closed => error(StatusCode::BAD_GATEWAY, "relay connection lost"),
    }
}

/// `GET /api/status`
pub async fn status_handler(Extension(core): Extension<Arc<ClientCore>>) -> Json<Value> {
    Json(json!({
        "connected": core.state.connected(),
        "profile": core.state.profile().map(|p| json!({
            "username": p.username,
            "uid": p.uid,
            "avatar": p.avatar,
        })),
        "last_code": core.state.last_code(),
        "online_users": core.state.roster(),
        "notifications": core.state.notifications(),
    }))
}

/// `POST /api/request_code`
pub async fn request_code_handler(Extension(core): Extension<Arc<ClientCore>>) -> ApiResult {
    emit(&core, ClientEvent::RequestVerificationCode).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
    pub code: String,
}

/// `POST /api/login`
pub async fn login_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<LoginBody>,
) -> ApiResult {
    emit(
        &core,
        ClientEvent::SubmitLoginVerify {
            username: Some(body.username),
            password: Some(body.password),
            code: Some(body.code),
            uid: None,
            token: None,
        },
    )
    .await?;
    Ok(Json(json!({"ok": true})))
}

/// `POST /api/logout` — forgets the local identity as well, so the next
/// connect does not silently reauthenticate.
pub async fn logout_handler(Extension(core): Extension<Arc<ClientCore>>) -> ApiResult {
    emit(&core, ClientEvent::Logout).await?;
    core.state.clear_profile();
    core.mirror.clear_identity();
    core.mirror.delete_profile();
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub temp_id: Option<String>,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub quote: Option<String>,
}

/// `POST /api/send_message`
pub async fn send_message_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<SendMessageBody>,
) -> ApiResult {
    emit(
        &core,
        ClientEvent::Message {
            content: body.content,
            kind: body.kind,
            temp_id: body.temp_id,
            target: body.target,
            quote: body.quote,
        },
    )
    .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct SendReactionBody {
    pub msg_id: String,
    pub reaction_kind: String,
    #[serde(default)]
    pub target: Target,
}

/// `POST /api/send_reaction`
pub async fn send_reaction_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<SendReactionBody>,
) -> ApiResult {
    emit(
        &core,
        ClientEvent::Reaction {
            msg_id: body.msg_id,
            reaction_kind: body.reaction_kind,
            target: body.target,
        },
    )
    .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct UpdateProfileBody {
    #[serde(default)]
    pub new_username: Option<String>,
    #[serde(default)]
    pub new_password: Option<String>,
    #[serde(default)]
    pub new_avatar: Option<String>,
}

/// `POST /api/update_profile`
pub async fn update_profile_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<UpdateProfileBody>,
) -> ApiResult {
    emit(
        &core,
        ClientEvent::UpdateProfile {
            new_avatar: body.new_avatar,
            new_username: body.new_username,
            new_password: body.new_password,
        },
    )
    .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Deserialize)]
pub struct HistoryBody {
    #[serde(default)]
    pub target: Target,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    128
}

/// `POST /api/request_history` — bridged: the response arrives as a
/// `history_loaded` event on the persistent connection.
pub async fn request_history_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<HistoryBody>,
) -> ApiResult {
    let pending = core.bridge.register(ResponseKey::history(&body.target));
    emit(
        &core,
        ClientEvent::ChatHistory {
            target: body.target,
            limit: body.limit,
        },
    )
    .await?;

    core.bridge
        .wait(pending, HISTORY_TIMEOUT)
        .await
        .map(Json)
        .map_err(bridge_error)
}

#[derive(Deserialize)]
pub struct CheckUserBody {
    pub username: String,
}

/// `POST /api/check_user` — answered locally when the query names our own
/// cached identity, bridged to the relay otherwise.
pub async fn check_user_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<CheckUserBody>,
) -> ApiResult {
    if let Some(profile) = core.state.profile() {
        if profile.username == body.username || profile.uid == body.username {
            return Ok(Json(json!({
                "exists": true,
                "uid": profile.uid,
                "username": profile.username,
                "avatar": profile.avatar,
            })));
        }
    }

    let pending = core.bridge.register(ResponseKey::CheckUser);
    emit(
        &core,
        ClientEvent::CheckUser {
            username: body.username,
        },
    )
    .await?;

    core.bridge
        .wait(pending, CHECK_USER_TIMEOUT)
        .await
        .map(Json)
        .map_err(bridge_error)
}

/// `POST /api/get_local_history` — reads the mirror only, never the relay.
pub async fn get_local_history_handler(
    Extension(core): Extension<Arc<ClientCore>>,
    Json(body): Json<HistoryBody>,
) -> ApiResult {
    let messages = core.mirror.read_recent(body.target.as_str(), body.limit);
    Ok(Json(json!({"messages": messages})))
}
