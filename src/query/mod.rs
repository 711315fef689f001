//! Query gateway.
//!
//! One WebSocket per client at `/ws/mysql/{id}`, one MySQL connection per
//! session, one textual statement per inbound text frame.

pub mod executor;
pub mod gateway;
