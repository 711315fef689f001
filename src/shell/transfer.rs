//! File-transfer sub-protocol: auxiliary SFTP channel and upload staging.
//!
//! File operations never ride the interactive terminal stream. Each one runs
//! over an SFTP subsystem channel opened on demand over the session's
//! existing SSH connection: uploads hold the session's channel open for the
//! duration of the transfer, downloads and listings open a scoped channel
//! that is released before the handler returns.
//!
//! Uploads are staged into a temporary file on the gateway and only pushed to
//! the remote on `transfer-end`. The staging file is backed by a delete-on-
//! drop guard, so every exit path — success, failure, or mid-transfer session
//! teardown — removes it.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use russh::client;
use russh_sftp::client::SftpSession;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::protocol::{FileEntry, FileKind};

use super::connector::ClientHandler;

/// Auxiliary secure-file-transfer channel with an explicit working directory.
///
/// SFTP itself has no notion of a current directory; the channel tracks one
/// so uploads land where the interactive shell "is" and `cd` mirroring has
/// something to update.
pub struct FileChannel {
    sftp: SftpSession,
    cwd: String,
}

impl FileChannel {
    /// Open a new SFTP subsystem channel over the session's SSH connection.
    ///
    /// The whole handshake (channel open, subsystem request, SFTP version
    /// exchange) runs under the channel-open timeout.
    pub async fn open(
        handle: &mut client::Handle<ClientHandler>,
        timeout: Duration,
    ) -> Result<Self> {
        let sftp = tokio::time::timeout(timeout, async {
            let channel = handle.channel_open_session().await.map_err(|e| {
                GatewayError::transfer(format!("failed to open SFTP channel: {e}"))
            })?;
            channel.request_subsystem(true, "sftp").await.map_err(|e| {
                GatewayError::transfer(format!("SFTP subsystem request failed: {e}"))
            })?;
            SftpSession::new(channel.into_stream())
                .await
                .map_err(|e| GatewayError::transfer(format!("SFTP handshake failed: {e}")))
        })
        .await
        .map_err(|_| GatewayError::transfer("timed out opening SFTP channel"))??;

        let cwd = sftp
            .canonicalize(".")
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot resolve remote home: {e}")))?;
        debug!("SFTP channel open, cwd {cwd}");
        Ok(Self { sftp, cwd })
    }

    /// The channel's current working directory.
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Change the working directory, verifying the target exists and is a
    /// directory on the remote side.
    pub async fn change_dir(&mut self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        let resolved = self
            .sftp
            .canonicalize(&target)
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot resolve {target}: {e}")))?;
        let attrs = self
            .sftp
            .metadata(&resolved)
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot stat {resolved}: {e}")))?;
        if !attrs.is_dir() {
            return Err(GatewayError::transfer(format!(
                "not a directory: {resolved}"
            )));
        }
        self.cwd = resolved;
        Ok(())
    }

    /// Size of a remote file, for `download-start`.
    pub async fn stat_size(&self, filename: &str) -> Result<u64> {
        let path = self.resolve(filename);
        let attrs = self
            .sftp
            .metadata(&path)
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot stat {path}: {e}")))?;
        Ok(attrs.size.unwrap_or(0))
    }

    /// Open a remote file for reading.
    pub async fn open_read(&self, filename: &str) -> Result<russh_sftp::client::fs::File> {
        let path = self.resolve(filename);
        self.sftp
            .open(&path)
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot open {path}: {e}")))
    }

    /// Stream a staged local file to `filename` in the working directory.
    pub async fn upload(&self, staging: &mut tokio::fs::File, filename: &str) -> Result<()> {
        let path = self.resolve(filename);
        let mut remote = self
            .sftp
            .create(&path)
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot create {path}: {e}")))?;
        tokio::io::copy(staging, &mut remote)
            .await
            .map_err(|e| GatewayError::transfer(format!("upload to {path} failed: {e}")))?;
        remote
            .shutdown()
            .await
            .map_err(|e| GatewayError::transfer(format!("closing {path} failed: {e}")))?;
        Ok(())
    }

    /// List the working directory. `size` and `modified` are set only for
    /// non-directory entries.
    pub async fn list(&self) -> Result<Vec<FileEntry>> {
        let entries = self
            .sftp
            .read_dir(&self.cwd)
            .await
            .map_err(|e| GatewayError::transfer(format!("cannot list {}: {e}", self.cwd)))?;

        let mut files = Vec::new();
        for entry in entries {
            let name = entry.file_name();
            let attrs = entry.metadata();
            if attrs.is_dir() {
                files.push(FileEntry {
                    name,
                    kind: FileKind::Directory,
                    size: None,
                    modified: None,
                });
            } else {
                files.push(FileEntry {
                    name,
                    kind: FileKind::File,
                    size: attrs.size,
                    modified: attrs.mtime.map(u64::from),
                });
            }
        }
        Ok(files)
    }

    /// Resolve a name against the working directory.
    fn resolve(&self, name: &str) -> String {
        if name.starts_with('/') {
            name.to_string()
        } else if self.cwd.ends_with('/') {
            format!("{}{name}", self.cwd)
        } else {
            format!("{}/{name}", self.cwd)
        }
    }
}

/// One in-flight upload, staged into a scoped temporary file.
///
/// At most one exists per session. Every binary frame appends to the staging
/// file; the state is consumed on `transfer-end` or dropped at teardown, and
/// the staging file is deleted either way by its [`TempPath`] guard.
pub struct FileTransferState {
    filename: String,
    declared_size: u64,
    received: u64,
    file: tokio::fs::File,
    path: TempPath,
    overrun_flagged: bool,
}

impl FileTransferState {
    pub fn new(filename: &str, declared_size: u64) -> Result<Self> {
        let staging = NamedTempFile::new()
            .map_err(|e| GatewayError::transfer(format!("failed to create staging file: {e}")))?;
        let (std_file, path) = staging.into_parts();
        debug!(
            "Staging upload {filename} ({declared_size} bytes declared) at {}",
            path.display()
        );
        Ok(Self {
            filename: filename.to_string(),
            declared_size,
            received: 0,
            file: tokio::fs::File::from_std(std_file),
            path,
            overrun_flagged: false,
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn staging_path(&self) -> &Path {
        &self.path
    }

    /// Append one binary chunk to the staging file. Receiving more than the
    /// declared total is flagged once, not rejected.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| GatewayError::transfer(format!("staging write failed: {e}")))?;
        self.received += chunk.len() as u64;
        if self.received > self.declared_size && !self.overrun_flagged {
            self.overrun_flagged = true;
            warn!(
                "Upload {} exceeded its declared size ({} > {})",
                self.filename, self.received, self.declared_size
            );
        }
        Ok(())
    }

    /// Flush staged bytes and hand back the open file rewound to the start,
    /// consuming the state. The returned [`TempPath`] keeps the delete-on-drop
    /// guard alive for the duration of the remote upload.
    pub async fn into_staged(mut self) -> Result<(tokio::fs::File, TempPath)> {
        self.file
            .flush()
            .await
            .map_err(|e| GatewayError::transfer(format!("staging flush failed: {e}")))?;
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| GatewayError::transfer(format!("staging rewind failed: {e}")))?;
        Ok((self.file, self.path))
    }
}

/// Read until `buf` is full or the reader hits EOF; returns the bytes read.
///
/// Plain `read` may return short counts, which would break the fixed-block
/// download framing.
pub async fn read_full<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_accumulate_and_overrun_is_flagged() {
        let mut state = FileTransferState::new("a.txt", 5).unwrap();
        state.write_chunk(b"hel").await.unwrap();
        state.write_chunk(b"lo").await.unwrap();
        assert_eq!(state.received(), 5);
        assert!(!state.overrun_flagged);

        state.write_chunk(b"!").await.unwrap();
        assert_eq!(state.received(), 6);
        assert!(state.overrun_flagged);
    }

    #[tokio::test]
    async fn staged_file_contains_exactly_what_was_received() {
        let mut state = FileTransferState::new("a.txt", 5).unwrap();
        state.write_chunk(b"hello").await.unwrap();
        let (mut file, guard) = state.into_staged().await.unwrap();

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents, b"hello");
        drop(file);
        drop(guard);
    }

    #[tokio::test]
    async fn dropping_state_deletes_staging_file() {
        let state = FileTransferState::new("a.txt", 5).unwrap();
        let path = state.staging_path().to_path_buf();
        assert!(path.exists());
        drop(state);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn staging_guard_outlives_the_open_file() {
        let mut state = FileTransferState::new("a.txt", 2).unwrap();
        state.write_chunk(b"hi").await.unwrap();
        let (file, guard) = state.into_staged().await.unwrap();
        let path = guard.to_path_buf();
        assert!(path.exists());
        drop(file);
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn read_full_fills_across_short_reads() {
        // A slice reader yields everything at once, but the loop must also
        // stop cleanly at EOF with a partial final block.
        let data = vec![7u8; 2500];
        let mut reader = &data[..];
        let mut buf = [0u8; 1024];

        let mut blocks = Vec::new();
        loop {
            let n = read_full(&mut reader, &mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            blocks.push(n);
            if n < buf.len() {
                break;
            }
        }
        assert_eq!(blocks, vec![1024, 1024, 452]);
    }
}
