//! Shared WebSocket send helpers for the two gateway variants.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;

use crate::error::GatewayError;
use crate::protocol::ControlEvent;

/// Send one control envelope on the socket. Returns `false` when the client
/// is gone.
pub async fn send_envelope(sink: &mut SplitSink<WebSocket, Message>, event: &ControlEvent) -> bool {
    sink.send(Message::Text(event.to_json().into()))
        .await
        .is_ok()
}

/// Report a fatal error to the client: one `error` envelope, then a close
/// frame with a server-error status carrying the failure reason.
pub async fn close_with_error(mut sink: SplitSink<WebSocket, Message>, error: &GatewayError) {
    let reason = error.to_string();
    let _ = send_envelope(&mut sink, &ControlEvent::error(reason.clone())).await;
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code::ERROR,
            reason: reason.into(),
        })))
        .await;
}
