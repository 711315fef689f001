//! WebSocket transport for MySQL console sessions.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /ws/mysql/{id}` — the final path segment is the
//!    session id.
//! 2. The MySQL connection is opened at establishment time. Success emits a
//!    `connection-established` envelope; failure emits one `error` envelope
//!    and closes the socket with a server-error status.
//! 3. Every inbound text frame is one textual statement. Execution errors are
//!    reported per frame and leave the connection open for the next query.
//! 4. On disconnect the registry tears the session down, closing the MySQL
//!    connection.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::{ConnectOptions, MySqlConnection};
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::inventory::HostDescriptor;
use crate::protocol::{ControlEvent, MAX_FRAME_BYTES};
use crate::registry::{ConnectionState, SessionKind, SharedSession};
use crate::state::AppState;
use crate::transport::{close_with_error, send_envelope};

use super::executor;

/// `GET /ws/mysql/{id}` — WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_query(socket, state, id))
}

/// Per-connection event loop.
async fn handle_query(socket: WebSocket, state: AppState, id: String) {
    info!("Query client connected for session {id}");
    let (mut ws_sink, mut ws_stream) = socket.split();

    let session = match state.registry.register(&id, SessionKind::Query).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Session {id} rejected: {e}");
            close_with_error(ws_sink, &e).await;
            return;
        }
    };

    let connected = match state.directory.find(&id).await {
        Some(desc) => connect(&desc, &state.config.gateway).await,
        None => Err(GatewayError::HostNotFound(id.clone())),
    };
    let connection = match connected {
        Ok(connection) => connection,
        Err(e) => {
            error!("Session {id}: failed to establish MySQL connection: {e}");
            session.lock().await.state = ConnectionState::Failed;
            close_with_error(ws_sink, &e).await;
            state.registry.unregister(&id).await;
            return;
        }
    };
    {
        let mut locked = session.lock().await;
        locked.query = Some(connection);
        locked.state = ConnectionState::Connected;
    }

    let established = ControlEvent::ConnectionEstablished {
        message: "MySQL connection established".to_string(),
    };
    if !send_envelope(&mut ws_sink, &established).await {
        state.registry.unregister(&id).await;
        return;
    }

    // Frame loop — one statement at a time for this session.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(sql) => {
                let response = run_frame(&session, sql.as_str()).await;
                if !send_envelope(&mut ws_sink, &response).await {
                    break;
                }
            }
            Message::Binary(data) => debug!(
                "Session {id}: dropped binary frame on query gateway ({} bytes)",
                data.len()
            ),
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.unregister(&id).await;
    info!("Query client disconnected for session {id}");
}

/// Open the session's MySQL connection under the connect timeout.
///
/// TLS is disabled to match the deployment this gateway fronts; the
/// connection itself rides the operator network.
async fn connect(desc: &HostDescriptor, gateway: &GatewayConfig) -> Result<MySqlConnection> {
    let options = MySqlConnectOptions::new()
        .host(&desc.host)
        .port(desc.port)
        .username(&desc.username)
        .password(&desc.password)
        .ssl_mode(MySqlSslMode::Disabled);

    info!(
        "Connecting to MySQL host {}:{} ({})",
        desc.host, desc.port, desc.display_name
    );
    let connection = tokio::time::timeout(
        Duration::from_secs(gateway.connect_timeout_secs),
        options.connect(),
    )
    .await
    .map_err(|_| GatewayError::ConnectTimeout)?
    .map_err(|e| GatewayError::handshake(format!("MySQL connection failed: {e}")))?;
    info!("MySQL connection established ({})", desc.display_name);
    Ok(connection)
}

/// Execute one statement frame and build the response envelope.
async fn run_frame(session: &SharedSession, sql: &str) -> ControlEvent {
    let mut locked = session.lock().await;
    let sid = locked.id.clone();
    let Some(conn) = locked.query.as_mut() else {
        return ControlEvent::error("query connection is not established");
    };

    debug!("Session {sid}: executing statement");
    match executor::run_statement(conn, sql).await {
        Ok(outcome) => ControlEvent::QueryResult { outcome },
        Err(e) => {
            warn!("Session {sid}: statement failed: {e}");
            ControlEvent::error(e.to_string())
        }
    }
}
