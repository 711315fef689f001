//! WebSocket transport for interactive shell sessions.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /ws/ssh/{id}` — the final path segment is the
//!    session id, which keys the host directory and the session registry.
//! 2. The registry entry is created first, then the SSH connection is
//!    established. Handshake failure sends one `error` envelope and closes
//!    the socket with a server-error status; no retry is attempted.
//! 3. Frames are processed one at a time per session. Remote output is
//!    forwarded concurrently through the outbound funnel, so a blocking file
//!    operation never stalls terminal output.
//! 4. On disconnect from either side the registry tears down every resource
//!    the session owns.
//!
//! ## Inbound frame classification (in order)
//!
//! | Frame                                | Routed to                        |
//! |--------------------------------------|----------------------------------|
//! | Text, recognized control envelope    | Matching control handler         |
//! | Text, anything else                  | Remote shell input, verbatim     |
//! | Binary                               | Active upload's chunk writer     |
//!
//! A binary frame with no active upload is dropped (logged, no error).

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, Result};
use crate::protocol::{
    classify_text, ControlEvent, ControlRequest, InboundText, DOWNLOAD_CHUNK_BYTES,
    MAX_FRAME_BYTES,
};
use crate::registry::{ConnectionState, SessionKind, SharedSession};
use crate::state::AppState;
use crate::transport::close_with_error;

use super::connector::{self, ShellEvent};
use super::transfer::{read_full, FileChannel, FileTransferState};

/// `GET /ws/ssh/{id}` — WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(MAX_FRAME_BYTES)
        .max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_shell(socket, state, id))
}

/// Per-connection event loop.
async fn handle_shell(socket: WebSocket, state: AppState, id: String) {
    info!("Shell client connected for session {id}");
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Register first: the registry entry is the unit of ownership everything
    // below attaches to.
    let session = match state.registry.register(&id, SessionKind::Shell).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Session {id} rejected: {e}");
            close_with_error(ws_sink, &e).await;
            return;
        }
    };

    // Resolve the host descriptor and establish the remote shell.
    let (events_tx, events_rx) = mpsc::channel::<ShellEvent>(256);
    let connected = match state.directory.find(&id).await {
        Some(desc) => connector::connect(&desc, &state.config.gateway, events_tx).await,
        None => Err(GatewayError::HostNotFound(id.clone())),
    };
    let connection = match connected {
        Ok(connection) => connection,
        Err(e) => {
            error!("Session {id}: failed to establish SSH connection: {e}");
            session.lock().await.state = ConnectionState::Failed;
            close_with_error(ws_sink, &e).await;
            state.registry.unregister(&id).await;
            return;
        }
    };
    {
        let mut locked = session.lock().await;
        locked.shell = Some(connection);
        locked.state = ConnectionState::Connected;
    }

    // Outbound funnel: control handlers and the output forwarder share one
    // channel so remote output keeps flowing while a handler blocks on
    // remote I/O.
    let (tx, mut rx) = mpsc::channel::<Message>(32);
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Forward remote output; signal the frame loop when the remote closes.
    let (closed_tx, mut closed_rx) = mpsc::channel::<()>(1);
    let forward_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        let mut events_rx = events_rx;
        while let Some(event) = events_rx.recv().await {
            match event {
                ShellEvent::Output(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if forward_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                ShellEvent::Closed => break,
            }
        }
        let _ = closed_tx.send(()).await;
    });

    // Frame loop — one inbound frame at a time for this session.
    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                let Some(Ok(msg)) = frame else { break };
                match msg {
                    Message::Text(text) => handle_text(&state, &session, &tx, text.as_str()).await,
                    Message::Binary(data) => handle_chunk(&session, &data).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            _ = closed_rx.recv() => {
                info!("Session {id}: remote side closed the shell");
                break;
            }
        }
    }

    state.registry.unregister(&id).await;
    forward_task.abort();
    send_task.abort();
    info!("Shell client disconnected for session {id}");
}

/// Classify and route one inbound text frame.
async fn handle_text(
    state: &AppState,
    session: &SharedSession,
    tx: &mpsc::Sender<Message>,
    payload: &str,
) {
    match classify_text(payload) {
        InboundText::Control(request) => dispatch_control(state, session, tx, request).await,
        InboundText::Raw(bytes) => forward_input(session, bytes).await,
    }
}

/// Write raw interactive bytes to the remote shell, mirroring `cd` onto the
/// auxiliary channel's working directory when one is open.
async fn forward_input(session: &SharedSession, payload: &str) {
    let mut locked = session.lock().await;
    let sid = locked.id.clone();

    let Some(shell) = locked.shell.as_ref() else {
        warn!("Session {sid}: raw input with no shell connection");
        return;
    };
    if let Err(e) = shell.write_stdin(payload.as_bytes().to_vec()).await {
        warn!("Session {sid}: shell input write failed: {e}");
        return;
    }

    // Best-effort cd mirroring: a prefix guess, deliberately not a shell
    // parser. Failure is logged, never surfaced to the client.
    if let Some(target) = payload.trim().strip_prefix("cd ") {
        let target = target.trim().to_string();
        if let Some(files) = locked.files.as_mut() {
            match files.change_dir(&target).await {
                Ok(()) => debug!("Session {sid}: mirrored cd to {target}"),
                Err(e) => warn!("Session {sid}: cd mirror to {target} failed: {e}"),
            }
        }
    }
}

/// Route a binary frame to the active upload. With no transfer in flight the
/// frame is dropped.
async fn handle_chunk(session: &SharedSession, data: &[u8]) {
    let mut locked = session.lock().await;
    let sid = locked.id.clone();
    match locked.transfer.as_mut() {
        Some(transfer) => {
            if let Err(e) = transfer.write_chunk(data).await {
                error!("Session {sid}: staging write failed: {e}");
            }
        }
        None => debug!(
            "Session {sid}: dropped binary frame with no active transfer ({} bytes)",
            data.len()
        ),
    }
}

/// Dispatch one control envelope. Failures here are local to the operation:
/// they become an `error` envelope and the shell session stays usable.
async fn dispatch_control(
    state: &AppState,
    session: &SharedSession,
    tx: &mpsc::Sender<Message>,
    request: ControlRequest,
) {
    let result = match request {
        ControlRequest::TransferStart {
            filename,
            size,
            directory,
        } => handle_transfer_start(state, session, &filename, size, &directory).await,
        ControlRequest::TransferEnd { filename } => handle_transfer_end(session, &filename).await,
        ControlRequest::DownloadRequest { filename } => {
            handle_download(state, session, tx, &filename).await
        }
        ControlRequest::ListRequest { path } => handle_list(state, session, tx, &path).await,
    };
    if let Err(e) = result {
        let _ = send_event(tx, ControlEvent::error(e.to_string())).await;
    }
}

/// `transfer-start` — open the session's auxiliary channel and stage upload
/// state.
async fn handle_transfer_start(
    state: &AppState,
    session: &SharedSession,
    filename: &str,
    size: u64,
    directory: &str,
) -> Result<()> {
    let mut locked = session.lock().await;
    let sid = locked.id.clone();

    if locked.transfer.is_some() {
        return Err(GatewayError::transfer("another upload is already in progress"));
    }
    let Some(shell) = locked.shell.as_mut() else {
        return Err(GatewayError::transfer("no shell connection for this session"));
    };

    let timeout = Duration::from_secs(state.config.gateway.channel_timeout_secs);
    let mut files = FileChannel::open(&mut shell.handle, timeout).await?;
    if let Err(e) = files.change_dir(directory).await {
        let fallback = &state.config.gateway.default_upload_dir;
        warn!("Session {sid}: cannot change to {directory} ({e}), falling back to {fallback}");
        files.change_dir(fallback).await?;
    }

    info!(
        "Session {sid}: upload of {filename} started ({size} bytes declared, directory {})",
        files.cwd()
    );
    locked.transfer = Some(FileTransferState::new(filename, size)?);
    locked.files = Some(files);
    Ok(())
}

/// `transfer-end` — push the staged file to the remote, then release the
/// staging file and the auxiliary channel no matter what.
async fn handle_transfer_end(session: &SharedSession, filename: &str) -> Result<()> {
    let (transfer, files, sid) = {
        let mut locked = session.lock().await;
        let sid = locked.id.clone();
        let transfer = locked
            .transfer
            .take()
            .ok_or_else(|| GatewayError::transfer("no upload in progress"))?;
        (transfer, locked.files.take(), sid)
    };
    // Both resources are out of the session now: they are released when this
    // function returns, on every path.

    let Some(files) = files else {
        return Err(GatewayError::transfer("auxiliary channel is not open"));
    };

    let declared = transfer.declared_size();
    let received = transfer.received();
    if received != declared {
        // Deliberate: upload whatever was received rather than abort.
        warn!(
            "Session {sid}: upload {filename} received {received} bytes but {declared} were \
             declared; uploading what was received"
        );
    }

    let result = async {
        let (mut staging, _guard) = transfer.into_staged().await?;
        files.upload(&mut staging, filename).await
    }
    .await;

    match &result {
        Ok(()) => info!("Session {sid}: upload of {filename} completed ({received} bytes)"),
        Err(e) => warn!("Session {sid}: upload of {filename} failed: {e}"),
    }
    result
}

/// `download-request` — stream a remote file to the client in fixed 1 MiB
/// base64 blocks over a scoped auxiliary channel.
async fn handle_download(
    state: &AppState,
    session: &SharedSession,
    tx: &mpsc::Sender<Message>,
    filename: &str,
) -> Result<()> {
    let (channel, sid) = open_scoped_channel(state, session).await?;

    let result = stream_download(&channel, tx, filename).await;
    // Scoped channel released before the handler returns, success or not.
    drop(channel);

    match &result {
        Ok(total) => info!("Session {sid}: download of {filename} completed ({total} bytes)"),
        Err(e) => warn!("Session {sid}: download of {filename} failed: {e}"),
    }
    result.map(|_| ())
}

/// `list-request` — list a remote directory over a scoped auxiliary channel.
async fn handle_list(
    state: &AppState,
    session: &SharedSession,
    tx: &mpsc::Sender<Message>,
    path: &str,
) -> Result<()> {
    let (mut channel, sid) = open_scoped_channel(state, session).await?;

    let result = async {
        channel.change_dir(path).await?;
        channel.list().await
    }
    .await;
    drop(channel);

    let files = result?;
    debug!("Session {sid}: listed {} entries in {path}", files.len());
    send_event(
        tx,
        ControlEvent::DirectoryListing {
            path: path.to_string(),
            files,
        },
    )
    .await
}

/// Open a handler-scoped auxiliary channel over the session's SSH connection.
/// The session lock is released before the caller starts remote I/O.
async fn open_scoped_channel(
    state: &AppState,
    session: &SharedSession,
) -> Result<(FileChannel, String)> {
    let mut locked = session.lock().await;
    let sid = locked.id.clone();
    let Some(shell) = locked.shell.as_mut() else {
        return Err(GatewayError::transfer("no shell connection for this session"));
    };
    let timeout = Duration::from_secs(state.config.gateway.channel_timeout_secs);
    let channel = FileChannel::open(&mut shell.handle, timeout).await?;
    Ok((channel, sid))
}

/// Stream one file as `download-start`, `download-chunk`*, `download-end`.
/// Returns the number of content bytes sent.
async fn stream_download(
    channel: &FileChannel,
    tx: &mpsc::Sender<Message>,
    filename: &str,
) -> Result<u64> {
    let total_size = channel.stat_size(filename).await?;
    send_event(
        tx,
        ControlEvent::DownloadStart {
            filename: filename.to_string(),
            total_size,
        },
    )
    .await?;

    let mut remote = channel.open_read(filename).await?;
    let mut buf = vec![0u8; DOWNLOAD_CHUNK_BYTES];
    let mut sent: u64 = 0;
    loop {
        let n = read_full(&mut remote, &mut buf)
            .await
            .map_err(|e| GatewayError::transfer(format!("remote read failed: {e}")))?;
        if n == 0 {
            break;
        }
        send_event(
            tx,
            ControlEvent::DownloadChunk {
                content: BASE64.encode(&buf[..n]),
                chunk_size: n,
            },
        )
        .await?;
        sent += n as u64;
        if n < buf.len() {
            // Short block means EOF.
            break;
        }
    }

    send_event(tx, ControlEvent::DownloadEnd).await?;
    Ok(sent)
}

/// Queue one control envelope on the outbound funnel.
async fn send_event(tx: &mpsc::Sender<Message>, event: ControlEvent) -> Result<()> {
    tx.send(Message::Text(event.to_json().into()))
        .await
        .map_err(|_| GatewayError::transfer("client connection closed"))
}
