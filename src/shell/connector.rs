//! SSH connector: opens and closes the remote shell connection.
//!
//! Connection establishment walks `Connecting → Connected` (see
//! [`crate::registry::ConnectionState`]): TCP + key exchange under a
//! 30-second timeout, password authentication, then an `xterm` PTY with a
//! UTF-8 locale and a shell, all under the shorter 3-second channel timeout.
//! Either timeout expires into [`GatewayError::ConnectTimeout`]; no retry is
//! attempted — reconnecting is the client's responsibility.
//!
//! Once connected, exactly one remote-I/O task runs for the session. It
//! forwards remote output in arrival order and drains queued client input.
//! The task ends on remote EOF, channel close, or relay error, emitting
//! [`ShellEvent::Closed`] so the gateway tears the session down. Cancellation
//! from our side is expressed by closing the SSH connection, which the task
//! observes as end-of-stream.

use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::ChannelMsg;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::inventory::HostDescriptor;

/// Events produced by a session's remote-I/O task.
#[derive(Debug)]
pub enum ShellEvent {
    /// Remote terminal output, forwarded in arrival order, one event per
    /// channel read.
    Output(Vec<u8>),
    /// The remote side closed the channel, or the relay hit an I/O error.
    Closed,
}

/// SSH client handler.
///
/// Host-key verification is disabled: the gateway accepts whatever identity
/// the configured host presents. This is an operational simplification, not a
/// security control — the warning below fires on every connect.
pub struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        warn!("Accepting remote host key without verification");
        Ok(true)
    }
}

/// A live SSH connection exclusively owned by one session.
pub struct ShellConnection {
    /// Authenticated transport handle, also used to open auxiliary channels.
    pub handle: client::Handle<ClientHandler>,
    /// Queue of raw input bytes for the remote shell.
    stdin_tx: mpsc::Sender<Vec<u8>>,
    /// The session's remote-I/O task.
    io_task: JoinHandle<()>,
}

impl ShellConnection {
    /// Queue raw bytes for the remote shell's input stream.
    pub async fn write_stdin(&self, data: Vec<u8>) -> Result<()> {
        self.stdin_tx.send(data).await.map_err(|_| {
            GatewayError::RemoteIo(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "shell input queue closed",
            ))
        })
    }

    /// Release the shell channel, then the transport session, tolerating
    /// partial failure.
    pub async fn close(self) {
        // Dropping the input queue makes the I/O task send EOF and wind down.
        drop(self.stdin_tx);
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            warn!("SSH disconnect failed: {e}");
        }
        self.io_task.abort();
    }
}

/// Establish the remote shell for a session.
///
/// Remote output and the close signal arrive on `events`.
pub async fn connect(
    desc: &HostDescriptor,
    gateway: &GatewayConfig,
    events: mpsc::Sender<ShellEvent>,
) -> Result<ShellConnection> {
    let connect_timeout = Duration::from_secs(gateway.connect_timeout_secs);
    let channel_timeout = Duration::from_secs(gateway.channel_timeout_secs);

    let config = Arc::new(client::Config {
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    });

    info!(
        "Connecting to SSH host {}:{} ({})",
        desc.host, desc.port, desc.display_name
    );
    let mut handle = tokio::time::timeout(
        connect_timeout,
        client::connect(config, (desc.host.as_str(), desc.port), ClientHandler),
    )
    .await
    .map_err(|_| GatewayError::ConnectTimeout)?
    .map_err(|e| GatewayError::handshake(format!("SSH connection failed: {e}")))?;

    let authenticated = handle
        .authenticate_password(&desc.username, &desc.password)
        .await
        .map_err(|e| GatewayError::handshake(format!("SSH authentication failed: {e}")))?;
    if !authenticated {
        return Err(GatewayError::handshake("SSH authentication rejected"));
    }
    debug!("SSH authentication successful ({})", desc.display_name);

    // Channel open, PTY, locale and shell all share the short channel timeout.
    let channel = tokio::time::timeout(channel_timeout, async {
        let channel = handle.channel_open_session().await?;
        channel
            .request_pty(
                true,
                "xterm",
                gateway.terminal_cols,
                gateway.terminal_rows,
                0,
                0,
                &[],
            )
            .await?;
        channel.set_env(false, "LANG", "en_US.UTF-8").await?;
        channel.set_env(false, "LC_ALL", "en_US.UTF-8").await?;
        channel.request_shell(true).await?;
        Ok::<_, russh::Error>(channel)
    })
    .await
    .map_err(|_| GatewayError::ConnectTimeout)?
    .map_err(|e| GatewayError::handshake(format!("failed to open shell channel: {e}")))?;
    info!("Shell channel open ({})", desc.display_name);

    let (stdin_tx, stdin_rx) = mpsc::channel(64);
    let io_task = tokio::spawn(relay(channel, stdin_rx, events));

    Ok(ShellConnection {
        handle,
        stdin_tx,
        io_task,
    })
}

/// The per-session remote-I/O task.
///
/// Forwards remote output to `events` in the order received and writes queued
/// client input to the channel. Exits on remote EOF/close, relay error, or
/// when the input queue is dropped at teardown; always emits
/// [`ShellEvent::Closed`] on the way out.
async fn relay(
    mut channel: russh::Channel<client::Msg>,
    mut stdin_rx: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<ShellEvent>,
) {
    loop {
        tokio::select! {
            input = stdin_rx.recv() => match input {
                Some(bytes) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        warn!("Shell input write failed: {e}");
                        break;
                    }
                }
                None => {
                    // Session torn down; half-close our side before exiting.
                    let _ = channel.eof().await;
                    break;
                }
            },
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    if events.send(ShellEvent::Output(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if events.send(ShellEvent::Output(data.to_vec())).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("Remote shell exited with status {exit_status}");
                }
                Some(ChannelMsg::Eof | ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
        }
    }
    let _ = events.send(ShellEvent::Closed).await;
    debug!("Shell relay task finished");
}
