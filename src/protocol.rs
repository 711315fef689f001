//! Wire protocol: control envelopes and inbound frame classification.
//!
//! Every client WebSocket carries three traffic classes over one connection:
//!
//! - **Raw interactive bytes** — text frames fed verbatim to the remote shell.
//! - **Control envelopes** — JSON objects with a recognized `"type"` field.
//! - **Binary chunks** — payload of an in-flight file upload.
//!
//! Classification is an explicit, ordered step producing a tagged variant —
//! a text frame is a control envelope if and only if it parses as one of the
//! [`ControlRequest`] types; anything else is raw bytes. Binary frames are
//! never classified as either.
//!
//! ## Message types (client → server)
//!
//! | Type               | Fields                          |
//! |--------------------|---------------------------------|
//! | `transfer-start`   | `filename`, `size`, `directory` |
//! | `transfer-end`     | `filename`                      |
//! | `download-request` | `filename`                      |
//! | `list-request`     | `path`                          |
//!
//! ## Message types (server → client)
//!
//! | Type                     | Key fields                              |
//! |--------------------------|-----------------------------------------|
//! | `connection-established` | `message`                               |
//! | `query-result`           | `columns[]`, `rows[][]` or `affected_rows` |
//! | `download-start`         | `filename`, `totalSize`                 |
//! | `download-chunk`         | `content` (base64), `chunkSize`         |
//! | `download-end`           | —                                       |
//! | `directory-listing`      | `path`, `files[]`                       |
//! | `error`                  | `message`                               |

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum WebSocket message size, text or binary (10 MiB).
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Fixed block size for streaming downloads (1 MiB).
pub const DOWNLOAD_CHUNK_BYTES: usize = 1024 * 1024;

/// Control envelope sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
    /// Begin an upload: open the auxiliary file channel and stage chunks.
    #[serde(rename = "transfer-start")]
    TransferStart {
        filename: String,
        size: u64,
        directory: String,
    },
    /// Finish an upload: push the staged file to the remote directory.
    #[serde(rename = "transfer-end")]
    TransferEnd { filename: String },
    /// Stream a remote file back to the client in base64 chunks.
    #[serde(rename = "download-request")]
    DownloadRequest { filename: String },
    /// List a remote directory.
    #[serde(rename = "list-request")]
    ListRequest { path: String },
}

/// Control envelope emitted by the server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ControlEvent {
    #[serde(rename = "connection-established")]
    ConnectionEstablished { message: String },
    #[serde(rename = "query-result")]
    QueryResult {
        #[serde(flatten)]
        outcome: QueryOutcome,
    },
    #[serde(rename = "download-start")]
    DownloadStart {
        filename: String,
        #[serde(rename = "totalSize")]
        total_size: u64,
    },
    #[serde(rename = "download-chunk")]
    DownloadChunk {
        /// Base64-encoded block content.
        content: String,
        #[serde(rename = "chunkSize")]
        chunk_size: usize,
    },
    #[serde(rename = "download-end")]
    DownloadEnd,
    #[serde(rename = "directory-listing")]
    DirectoryListing { path: String, files: Vec<FileEntry> },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ControlEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize into the JSON text carried by a WebSocket text frame.
    pub fn to_json(&self) -> String {
        // Serialization of these envelopes cannot fail: no maps with
        // non-string keys, no non-finite floats.
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("control envelope serialization failed: {e}");
            r#"{"type":"error","message":"internal serialization failure"}"#.to_string()
        })
    }
}

/// Either shape of a `query-result` envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// A statement that produced a row set.
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// A statement that produced an update count.
    Affected { affected_rows: u64 },
}

/// One entry of a `directory-listing` envelope. `size` and `modified` are
/// present only for non-directory entries.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Modification time, seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Directory,
    File,
}

/// Classification of an inbound text frame.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundText<'a> {
    /// A recognized control envelope.
    Control(ControlRequest),
    /// Raw interactive bytes for the remote shell.
    Raw(&'a str),
}

/// Classify a text frame payload.
///
/// A payload is a control envelope only if it is valid JSON *and* carries a
/// recognized `type`; malformed JSON, JSON without a `type`, and JSON with an
/// unrecognized `type` are all raw interactive bytes. This keeps typed shell
/// input (including input that happens to look like JSON) flowing to the
/// remote terminal.
pub fn classify_text(payload: &str) -> InboundText<'_> {
    match serde_json::from_str::<ControlRequest>(payload) {
        Ok(request) => InboundText::Control(request),
        Err(_) => InboundText::Raw(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_envelope_is_control() {
        let frame = r#"{"type":"transfer-start","filename":"a.txt","size":5,"directory":"/tmp"}"#;
        match classify_text(frame) {
            InboundText::Control(ControlRequest::TransferStart {
                filename,
                size,
                directory,
            }) => {
                assert_eq!(filename, "a.txt");
                assert_eq!(size, 5);
                assert_eq!(directory, "/tmp");
            }
            other => panic!("expected control frame, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_is_raw() {
        let frame = r#"{"type":"reboot-the-moon","filename":"a.txt"}"#;
        assert_eq!(classify_text(frame), InboundText::Raw(frame));
    }

    #[test]
    fn json_without_type_is_raw() {
        assert_eq!(
            classify_text(r#"{"filename":"a.txt"}"#),
            InboundText::Raw(r#"{"filename":"a.txt"}"#)
        );
        // Valid JSON, but not an object at all.
        assert_eq!(classify_text("42"), InboundText::Raw("42"));
    }

    #[test]
    fn shell_input_is_raw() {
        assert_eq!(classify_text("ls -la\n"), InboundText::Raw("ls -la\n"));
        assert_eq!(classify_text(""), InboundText::Raw(""));
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let frame = r#"{"type":"download-request","filename":"b.txt","nonce":7}"#;
        assert!(matches!(
            classify_text(frame),
            InboundText::Control(ControlRequest::DownloadRequest { .. })
        ));
    }

    #[test]
    fn download_envelopes_use_camel_case_sizes() {
        let start = ControlEvent::DownloadStart {
            filename: "b.txt".into(),
            total_size: 2621440,
        }
        .to_json();
        assert!(start.contains(r#""totalSize":2621440"#));

        let chunk = ControlEvent::DownloadChunk {
            content: "aGk=".into(),
            chunk_size: 2,
        }
        .to_json();
        assert!(chunk.contains(r#""chunkSize":2"#));
    }

    #[test]
    fn download_end_has_only_type() {
        assert_eq!(
            ControlEvent::DownloadEnd.to_json(),
            r#"{"type":"download-end"}"#
        );
    }

    #[test]
    fn query_result_takes_either_shape() {
        let rows = ControlEvent::QueryResult {
            outcome: QueryOutcome::Rows {
                columns: vec!["1".into()],
                rows: vec![vec![Value::from(1)]],
            },
        }
        .to_json();
        assert!(rows.contains(r#""type":"query-result""#));
        assert!(rows.contains(r#""columns":["1"]"#));
        assert!(rows.contains(r#""rows":[[1]]"#));

        let affected = ControlEvent::QueryResult {
            outcome: QueryOutcome::Affected { affected_rows: 3 },
        }
        .to_json();
        assert!(affected.contains(r#""affected_rows":3"#));
        assert!(!affected.contains("columns"));
    }

    #[test]
    fn listing_omits_size_for_directories() {
        let listing = ControlEvent::DirectoryListing {
            path: "/srv".into(),
            files: vec![
                FileEntry {
                    name: "logs".into(),
                    kind: FileKind::Directory,
                    size: None,
                    modified: None,
                },
                FileEntry {
                    name: "app.conf".into(),
                    kind: FileKind::File,
                    size: Some(412),
                    modified: Some(1722470400),
                },
            ],
        }
        .to_json();
        assert!(listing.contains(r#""type":"directory""#));
        assert!(listing.contains(r#""size":412"#));
        // The directory entry carries no size at all.
        assert_eq!(listing.matches("size").count(), 1);
    }
}
