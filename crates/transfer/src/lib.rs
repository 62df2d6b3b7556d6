//! Resumable chunked uploads and ranged downloads with integrity tracking.
//!
//! Sessions talk to the remote through a [`ChunkedTransport`], one request at
//! a time, and never retry on their own. Every transport failure leaves the
//! session where it was, so the caller decides whether to resend the chunk,
//! re-probe the remote, or give up and persist the resume point.

mod chunked;
mod download;
mod error;
mod integrity;
mod progress;
mod transport;
mod upload;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use chunked::{ChunkReader, ChunkWriter};
pub use download::{DownloadSession, DownloadState, DownloadedFile, RemoteObject};
pub use error::{TransferError, TransportError};
pub use integrity::{ChecksumAlgorithm, IntegrityTracker, checksum_bytes};
pub use progress::{NoProgress, ProgressObserver, ResumeState, SpeedCalculator, TransferProgress};
pub use transport::{ChunkedTransport, TransportFuture};
pub use upload::{UploadSession, UploadState};

use serde::{Deserialize, Serialize};

/// Default upload chunk: 10 MiB, a multiple of the 256 KiB granularity.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default download range length.
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: u64 = 10_000_000;

/// Per-session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferOptions {
    /// Bytes per request. `0` sends the rest of the object in one request.
    ///
    /// Upload chunks other than the last must be a multiple of
    /// [`driveport_protocol::UPLOAD_GRANULARITY`]; the remote rejects
    /// anything else and the session surfaces that as a transport error.
    pub chunk_size: u64,
    pub checksum: ChecksumAlgorithm,
    /// Compare the final digest with the checksum in the completion body.
    pub verify_completed_upload: bool,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            checksum: ChecksumAlgorithm::Md5,
            verify_completed_upload: false,
        }
    }
}

impl TransferOptions {
    pub fn upload() -> Self {
        Self::default()
    }

    pub fn download() -> Self {
        Self {
            chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Length of the chunk starting at `progress` of a `total`-byte object.
    pub fn chunk_len(&self, total: u64, progress: u64) -> u64 {
        let remaining = total.saturating_sub(progress);
        if self.chunk_size == 0 {
            remaining
        } else {
            remaining.min(self.chunk_size)
        }
    }
}

/// Outcome of one `next_chunk` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport<T> {
    /// Progress confirmed after this call.
    pub progress: TransferProgress,
    pub status: ChunkStatus<T>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus<T> {
    /// More chunks remain.
    Pending,
    /// The transfer finished.
    Complete(T),
    /// The observer asked to stop. The session can still be resumed.
    Aborted,
}

impl<T> ChunkStatus<T> {
    pub fn is_complete(&self) -> bool {
        matches!(self, ChunkStatus::Complete(_))
    }
}
