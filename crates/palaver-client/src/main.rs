//! Palaver client daemon binary.
//!
//! Connects to the relay, mirrors conversations locally, and serves the
//! local HTTP API until SIGTERM/SIGINT.

use palaver_client::{app, config, connection, ClientCore};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PALAVER_CLIENT_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("client.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the client cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let (core, outbound_rx) = ClientCore::new(&config.storage.data_dir);

    // Resume a cached identity so the first connect reauthenticates.
    if let Some(profile) = core.mirror.load_profile() {
        core.mirror.set_identity(&profile.uid);
        core.state.set_profile(
            profile.username.clone(),
            profile.uid.clone(),
            profile.avatar.clone(),
            profile.token.clone(),
        );
    }

    tokio::spawn(connection::run(
        core.clone(),
        outbound_rx,
        config.relay.url.clone(),
    ));

    let app = app(core);
    let addr = SocketAddr::new(config.api.host, config.api.port);

    tracing::info!(%addr, relay = %config.relay.url, "starting palaver client");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("palaver client shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
