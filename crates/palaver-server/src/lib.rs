//! Palaver relay server library logic.

pub mod api_ws;
pub mod auth;
pub mod background;
pub mod config;
pub mod registry;
pub mod relay;

use auth::AuthService;
use axum::{routing::get, Extension, Json, Router};
use palaver_store::{HistoryStore, ReactionLedger, UserStore};
use registry::SessionRegistry;
use relay::Relay;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across all handlers.
pub struct AppState {
    /// Message routing, history and roster fan-out.
    pub relay: Relay,
    /// Verification codes, login and reauth tokens.
    pub auth: AuthService,
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Users(#[from] palaver_store::UserStoreError),
    #[error(transparent)]
    Ledger(#[from] palaver_store::LedgerError),
}

impl AppState {
    /// Builds the full service stack from config paths, replaying the
    /// reaction ledger and loading the user file.
    pub fn open(storage_root: &Path, users_path: &Path) -> Result<Self, StateError> {
        let users = Arc::new(UserStore::open(users_path)?);
        let history = HistoryStore::new(storage_root);
        let reactions = ReactionLedger::open(storage_root)?;
        let relay = Relay::new(SessionRegistry::new(), history, reactions, users.clone());
        Ok(Self {
            relay,
            auth: AuthService::new(users),
        })
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router.
pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .layer(Extension(state))
        .layer(cors)
}
