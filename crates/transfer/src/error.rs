//! Transfer error types.

use driveport_protocol::HttpResponse;

use crate::progress::TransferProgress;

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

/// A single request failed or returned something the protocol does not allow.
///
/// Never retried by the core. Chunks are idempotent at the protocol level,
/// so the caller may resend the same chunk or re-probe progress.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unexpected HTTP status {status} during {context}: {body}")]
    Status {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("protocol error during {context}: {message}")]
    Protocol {
        context: &'static str,
        message: String,
    },
}

impl TransportError {
    /// Builds a status error from a response, truncating long bodies.
    pub fn unexpected(context: &'static str, resp: &HttpResponse) -> Self {
        let mut body = resp.body_text();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        TransportError::Status {
            context,
            status: resp.status,
            body,
        }
    }

    pub fn protocol(context: &'static str, message: impl Into<String>) -> Self {
        TransportError::Protocol {
            context,
            message: message.into(),
        }
    }

    /// HTTP status, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors produced by upload and download sessions.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local and remote digests disagree. The upload handle is unusable and
    /// a downloaded sink must be discarded.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The local file no longer has the size recorded when the session opened.
    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The progress observer asked to stop. Not a failure: the session and
    /// its handle remain valid for a later resume.
    #[error("aborted by caller at {} of {} bytes", .progress.bytes_transferred, .progress.total_size)]
    Aborted { progress: TransferProgress },

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    /// Returns `true` if a new session may pick up where this one stopped.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TransferError::Transport(_) | TransferError::Aborted { .. } | TransferError::Io(_)
        )
    }

    /// Returns `true` if the upload handle must not be written to again.
    pub fn invalidates_handle(&self) -> bool {
        matches!(
            self,
            TransferError::ChecksumMismatch { .. } | TransferError::SizeMismatch { .. }
        )
    }
}
