//! Interactive shell gateway.
//!
//! One WebSocket per client at `/ws/ssh/{id}`, one SSH connection per
//! session:
//!
//! - `connector` — SSH connect/auth/PTY handshake and the per-session
//!   remote-I/O task
//! - `gateway` — WebSocket upgrade, frame classification and dispatch
//! - `transfer` — auxiliary SFTP channel and upload staging

pub mod connector;
pub mod gateway;
pub mod transfer;

pub use connector::{ShellConnection, ShellEvent};
pub use transfer::{FileChannel, FileTransferState};
