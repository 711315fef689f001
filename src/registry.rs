//! Remote session registry — the single source of truth for live sessions.
//!
//! [`SessionRegistry`] is the only structure shared across sessions. Callers
//! go through its contract (`register` / `lookup` / `unregister`); the map
//! itself is never exposed. Per-session resources are modeled as explicit
//! `Option` fields on [`Session`] and are touched only by that session's
//! frame-processing path and its one remote-I/O task.
//!
//! ## Concurrency
//!
//! The session map is behind an `RwLock`. `register` holds the write lock
//! across the cap check and insert to prevent TOCTOU races. Each entry is an
//! `Arc<Mutex<Session>>` so resource access and teardown serialize per
//! session without blocking the map.
//!
//! ## Teardown
//!
//! `unregister` is idempotent — the second call for an id is a no-op — and
//! releases every resource the session owns in a fixed order (staged upload,
//! auxiliary channel, shell connection, query connection), tolerating any
//! individual release failing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sqlx::{Connection, MySqlConnection};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::shell::connector::ShellConnection;
use crate::shell::transfer::{FileChannel, FileTransferState};

/// Lifecycle of a session's remote connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
    /// Terminal state for a failed handshake.
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// Which gateway variant owns the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Shell,
    Query,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Query => "query",
        }
    }
}

/// One client-to-remote pairing and the resources it exclusively owns.
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub opened_at: Instant,
    pub state: ConnectionState,
    /// Interactive SSH connection (shell sessions only).
    pub shell: Option<ShellConnection>,
    /// Auxiliary file-transfer channel, held open while an upload is staged.
    pub files: Option<FileChannel>,
    /// In-flight upload; at most one at a time.
    pub transfer: Option<FileTransferState>,
    /// Remote query connection (query sessions only).
    pub query: Option<MySqlConnection>,
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Process-wide concurrent map from session id to session state.
///
/// Cloneable — all clones share the same inner map.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Register a new session in the `Connecting` state.
    ///
    /// Rejects empty ids, ids that are already active, and registrations past
    /// the session cap. Holds the write lock through the entire
    /// check-and-insert.
    pub async fn register(&self, id: &str, kind: SessionKind) -> Result<SharedSession> {
        if id.trim().is_empty() {
            return Err(GatewayError::EmptySessionId);
        }

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(id) {
            return Err(GatewayError::SessionExists(id.to_string()));
        }
        if sessions.len() >= self.max_sessions {
            return Err(GatewayError::SessionLimit(self.max_sessions));
        }

        let session = Arc::new(Mutex::new(Session {
            id: id.to_string(),
            kind,
            opened_at: Instant::now(),
            state: ConnectionState::Connecting,
            shell: None,
            files: None,
            transfer: None,
            query: None,
        }));
        sessions.insert(id.to_string(), Arc::clone(&session));
        info!(
            "Session {id} registered ({}), total: {}",
            kind.as_str(),
            sessions.len()
        );
        Ok(session)
    }

    /// Look up a live session by id.
    pub async fn lookup(&self, id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Count of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove a session and release everything it owns.
    ///
    /// Idempotent: returns `false` (and does nothing) when the id is absent.
    /// Individual release failures are logged and never abort the remaining
    /// releases.
    pub async fn unregister(&self, id: &str) -> bool {
        let entry = { self.sessions.write().await.remove(id) };
        let Some(entry) = entry else {
            debug!("Session {id}: unregister on absent id (no-op)");
            return false;
        };

        let mut session = entry.lock().await;
        if session.state != ConnectionState::Failed {
            session.state = ConnectionState::Closing;
        }
        release_resources(&mut session).await;
        if session.state != ConnectionState::Failed {
            session.state = ConnectionState::Closed;
        }
        info!(
            "Session {id} closed after {:.1?}",
            session.opened_at.elapsed()
        );
        true
    }

    /// Tear down every live session (graceful-shutdown path).
    pub async fn close_all(&self) {
        let ids: Vec<String> = { self.sessions.read().await.keys().cloned().collect() };
        if ids.is_empty() {
            return;
        }
        info!("Closing {} session(s)", ids.len());
        for id in ids {
            self.unregister(&id).await;
        }
    }
}

/// Release every resource owned by a session, tolerating partial failure.
///
/// Order: staged upload, auxiliary channel, shell channel + transport, query
/// connection.
async fn release_resources(session: &mut Session) {
    if let Some(transfer) = session.transfer.take() {
        debug!(
            "Session {}: discarding staged upload {} ({} of {} bytes received)",
            session.id,
            transfer.filename(),
            transfer.received(),
            transfer.declared_size()
        );
        // Dropping the state deletes the staging file via its guard.
        drop(transfer);
    }
    if let Some(files) = session.files.take() {
        drop(files);
        debug!("Session {}: auxiliary file channel released", session.id);
    }
    if let Some(shell) = session.shell.take() {
        shell.close().await;
        debug!("Session {}: shell connection released", session.id);
    }
    if let Some(query) = session.query.take() {
        if let Err(e) = query.close().await {
            warn!("Session {}: query connection close failed: {e}", session.id);
        } else {
            debug!("Session {}: query connection released", session.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = SessionRegistry::new(4);
        registry.register("op-1", SessionKind::Shell).await.unwrap();
        assert!(registry.lookup("op-1").await.is_some());
        assert_eq!(registry.count().await, 1);

        assert!(registry.unregister("op-1").await);
        assert!(registry.lookup("op-1").await.is_none());
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::new(4);
        registry.register("op-1", SessionKind::Query).await.unwrap();
        assert!(registry.unregister("op-1").await);
        assert!(!registry.unregister("op-1").await);
        assert!(!registry.unregister("never-existed").await);
    }

    #[tokio::test]
    async fn empty_id_is_rejected() {
        let registry = SessionRegistry::new(4);
        assert!(matches!(
            registry.register("", SessionKind::Shell).await,
            Err(GatewayError::EmptySessionId)
        ));
        assert!(matches!(
            registry.register("   ", SessionKind::Shell).await,
            Err(GatewayError::EmptySessionId)
        ));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = SessionRegistry::new(4);
        registry.register("op-1", SessionKind::Shell).await.unwrap();
        assert!(matches!(
            registry.register("op-1", SessionKind::Query).await,
            Err(GatewayError::SessionExists(_))
        ));
    }

    #[tokio::test]
    async fn session_cap_is_enforced() {
        let registry = SessionRegistry::new(2);
        registry.register("a", SessionKind::Shell).await.unwrap();
        registry.register("b", SessionKind::Shell).await.unwrap();
        assert!(matches!(
            registry.register("c", SessionKind::Shell).await,
            Err(GatewayError::SessionLimit(2))
        ));

        // Capacity frees up after teardown.
        registry.unregister("a").await;
        assert!(registry.register("c", SessionKind::Shell).await.is_ok());
    }

    #[tokio::test]
    async fn unregister_deletes_staged_upload() {
        let registry = SessionRegistry::new(4);
        let session = registry.register("op-1", SessionKind::Shell).await.unwrap();

        let path = {
            let mut locked = session.lock().await;
            let mut transfer = FileTransferState::new("a.txt", 5).unwrap();
            transfer.write_chunk(b"hel").await.unwrap();
            let path = transfer.staging_path().to_path_buf();
            locked.transfer = Some(transfer);
            path
        };
        assert!(path.exists());

        registry.unregister("op-1").await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn close_all_drains_every_session() {
        let registry = SessionRegistry::new(8);
        for id in ["a", "b", "c"] {
            registry.register(id, SessionKind::Shell).await.unwrap();
        }
        registry.close_all().await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_register_and_unregister() {
        let registry = SessionRegistry::new(64);
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("op-{i}");
                registry.register(&id, SessionKind::Shell).await.unwrap();
                registry.unregister(&id).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.count().await, 0);
    }
}
