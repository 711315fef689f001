//! Gateway error taxonomy.
//!
//! Errors split into two classes: **fatal** errors that compromise the remote
//! connection (handshake failures, timeouts, relay I/O errors) and tear the
//! session down, and **local** errors confined to one file-transfer operation
//! or one query, which are reported to the client and leave the session
//! usable. [`GatewayError::is_fatal`] is the single place that distinction is
//! made.

use thiserror::Error;

/// Main error type for gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No host descriptor exists for the session id the client connected with.
    #[error("no host configured for id: {0}")]
    HostNotFound(String),

    /// The session id extracted from the connection path was empty.
    #[error("session id must not be empty")]
    EmptySessionId,

    /// A session with this id is already registered.
    #[error("session already active: {0}")]
    SessionExists(String),

    /// The registry's session cap was reached.
    #[error("session limit reached (max {0})")]
    SessionLimit(usize),

    /// Remote connect or channel open exceeded its deadline.
    #[error("timed out connecting to remote host")]
    ConnectTimeout,

    /// Remote handshake failed (TCP, key exchange, or authentication).
    #[error("remote handshake failed: {message}")]
    Handshake { message: String },

    /// I/O error while relaying to or from the remote connection.
    #[error("remote I/O error: {0}")]
    RemoteIo(#[from] std::io::Error),

    /// Failure confined to one upload, download, or listing operation.
    #[error("file transfer failed: {message}")]
    Transfer { message: String },

    /// Failure confined to one query frame.
    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Error from the SSH transport layer.
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
}

impl GatewayError {
    /// Whether this error compromises the remote connection's integrity and
    /// must propagate to full session teardown. Non-fatal errors are reported
    /// via an `error` envelope and the session stays usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::HostNotFound(_)
            | Self::EmptySessionId
            | Self::SessionExists(_)
            | Self::SessionLimit(_)
            | Self::ConnectTimeout
            | Self::Handshake { .. }
            | Self::RemoteIo(_)
            | Self::Ssh(_) => true,
            Self::Transfer { .. } | Self::Query(_) => false,
        }
    }

    /// Shorthand for a transfer-local error.
    pub fn transfer(message: impl Into<String>) -> Self {
        Self::Transfer {
            message: message.into(),
        }
    }

    /// Shorthand for a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_split() {
        assert!(GatewayError::HostNotFound("op-1".into()).is_fatal());
        assert!(GatewayError::ConnectTimeout.is_fatal());
        assert!(!GatewayError::transfer("disk full").is_fatal());
        assert!(!GatewayError::Query(sqlx::Error::RowNotFound).is_fatal());
    }
}
