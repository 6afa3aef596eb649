//! Palaver client daemon library logic.
//!
//! The daemon holds the persistent relay connection, mirrors conversations
//! locally, and exposes a small HTTP API for the UI layer.

pub mod api;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod mirror;
pub mod state;

use axum::{routing::get, routing::post, Extension, Json, Router};
use bridge::Bridge;
use mirror::LocalMirror;
use palaver_types::ClientEvent;
use serde_json::{json, Value};
use state::ClientState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};

/// Outbound events queued toward the relay connection.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Everything shared between the connection loop and the HTTP surface.
pub struct ClientCore {
    pub state: ClientState,
    pub mirror: LocalMirror,
    pub bridge: Bridge,
    pub outbound: mpsc::Sender<ClientEvent>,
}

impl ClientCore {
    /// Builds the shared core plus the receiver half the connection loop
    /// consumes.
    pub fn new(data_dir: impl Into<std::path::PathBuf>) -> (Arc<Self>, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let core = Arc::new(Self {
            state: ClientState::new(),
            mirror: LocalMirror::new(data_dir),
            bridge: Bridge::new(),
            outbound: tx,
        });
        (core, rx)
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the local API router.
pub fn app(core: Arc<ClientCore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api::status_handler))
        .route("/api/request_code", post(api::request_code_handler))
        .route("/api/login", post(api::login_handler))
        .route("/api/logout", post(api::logout_handler))
        .route("/api/send_message", post(api::send_message_handler))
        .route("/api/send_reaction", post(api::send_reaction_handler))
        .route("/api/update_profile", post(api::update_profile_handler))
        .route("/api/request_history", post(api::request_history_handler))
        .route("/api/check_user", post(api::check_user_handler))
        .route("/api/get_local_history", post(api::get_local_history_handler))
        .layer(Extension(core))
        .layer(cors)
}
