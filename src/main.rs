//! # hostgate
//!
//! Browser-to-remote-host gateway.
//!
//! hostgate exposes remote hosts to browser clients over WebSockets: an
//! interactive SSH terminal (with file upload/download/listing over an
//! auxiliary SFTP channel) and a MySQL console, one long-lived connection per
//! client, addressed by the session id embedded in the route.
//!
//! ## Routes
//!
//! | Method | Path              | Description                            |
//! |--------|-------------------|----------------------------------------|
//! | GET    | `/ws/ssh/{id}`    | WebSocket: interactive shell session   |
//! | GET    | `/ws/mysql/{id}`  | WebSocket: MySQL console session       |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, router setup, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! inventory.rs     — host descriptor lookup (static table from config)
//! registry.rs      — SessionRegistry (register/lookup/unregister, teardown)
//! protocol.rs      — control envelopes, inbound frame classification
//! transport.rs     — shared WebSocket send helpers
//! shell/
//!   connector.rs   — SSH connect/auth/PTY, per-session remote-I/O task
//!   gateway.rs     — WebSocket upgrade, frame dispatch, transfer handlers
//!   transfer.rs    — auxiliary SFTP channel, upload staging
//! query/
//!   gateway.rs     — WebSocket upgrade, per-frame statement loop
//!   executor.rs    — statement classification and row serialization
//! ```

use std::sync::Arc;

use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use hostgate::{query, shell, AppState, Config, SessionRegistry, StaticDirectory};

/// Browser-to-remote-host gateway.
#[derive(Parser)]
#[command(name = "hostgate", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("hostgate v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let directory = Arc::new(StaticDirectory::new(config.hosts.clone()));
    if directory.is_empty() {
        warn!("No hosts configured — every connection will fail host lookup");
    } else {
        info!("{} host(s) in the directory", directory.len());
    }

    let registry = SessionRegistry::new(config.server.max_sessions);

    let state = AppState {
        config: Arc::new(config),
        registry: registry.clone(),
        directory,
    };

    // Browser clients connect from arbitrary origins.
    let app = Router::new()
        .route("/ws/ssh/{id}", get(shell::gateway::ws_upgrade))
        .route("/ws/mysql/{id}", get(query::gateway::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Cleanup: tear down every live session before exiting.
    info!("Shutting down...");
    registry.close_all().await;
    info!("Goodbye");
}
