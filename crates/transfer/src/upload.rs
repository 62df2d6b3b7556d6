//! Resumable upload session.
//!
//! One session pushes one local file to one resumable-upload URI, a chunk at
//! a time. The session is an explicit state machine:
//!
//! ```text
//! Fresh ──probe──▶ Probed ──reseed──▶ Transferring ──final chunk──▶ Succeeded
//!   │                                      │
//!   └──────── probe says complete ─────────┴──checksum/size mismatch──▶ Failed
//! ```
//!
//! - `Fresh`: handle adopted, remote progress unknown.
//! - `Probed`: remote progress known, digest not yet rebuilt.
//! - `Transferring`: digest covers exactly `[0, progress)`.
//!
//! Transport errors never change the state, so the same chunk can be sent
//! again or the progress re-probed with [`UploadSession::reprobe`].

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use driveport_protocol::constants::{header, status};
use driveport_protocol::{
    ContentRange, HttpRequest, ItemMetadata, UploadHandle, UploadMetadata, acknowledged_bytes,
};
use tracing::{debug, info, warn};

use crate::chunked::ChunkReader;
use crate::error::{TransferError, TransportError};
use crate::integrity::{ChecksumAlgorithm, IntegrityTracker};
use crate::progress::{ProgressObserver, ResumeState, TransferProgress};
use crate::transport::ChunkedTransport;
use crate::{ChunkReport, ChunkStatus, TransferOptions};

/// Upload session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    /// Handle adopted; the remote has not been asked how much it holds.
    Fresh,
    /// Remote progress known; the digest still has to be rebuilt.
    Probed { progress: u64 },
    /// Chunks are flowing; the digest covers `[0, progress)`.
    Transferring { progress: u64 },
    /// The remote created the object.
    Succeeded(ItemMetadata),
    /// Checksum or size mismatch. The handle must not be used again.
    Failed,
}

/// Drives one resumable upload.
pub struct UploadSession {
    transport: Arc<dyn ChunkedTransport>,
    source: ChunkReader,
    handle: UploadHandle,
    options: TransferOptions,
    tracker: Option<IntegrityTracker>,
    state: UploadState,
}

impl UploadSession {
    /// Opens a session, initiating a new upload unless `existing` is given.
    ///
    /// `initiate_url` is only used when initiating; the destination metadata
    /// is bound to the returned handle for its whole life.
    pub async fn open(
        transport: Arc<dyn ChunkedTransport>,
        source: &Path,
        initiate_url: &str,
        destination: &UploadMetadata,
        existing: Option<UploadHandle>,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        match existing {
            Some(handle) => Self::resume(transport, source, handle, options).await,
            None => Self::initiate(transport, source, initiate_url, destination, options).await,
        }
    }

    /// Initiates a new resumable upload and starts at progress 0.
    pub async fn initiate(
        transport: Arc<dyn ChunkedTransport>,
        source: &Path,
        initiate_url: &str,
        destination: &UploadMetadata,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let source = ChunkReader::open(source).await?;

        let req = HttpRequest::post(initiate_url).json(destination)?;
        let resp = transport.request(req).await?;
        if resp.status != status::OK {
            return Err(TransportError::unexpected("upload initiation", &resp).into());
        }
        let location = resp.header(header::LOCATION).ok_or_else(|| {
            TransportError::protocol("upload initiation", "response carries no Location header")
        })?;
        let handle = UploadHandle::new(location);

        info!(
            name = %destination.name,
            size = source.size(),
            upload_id = handle.upload_id().as_deref().unwrap_or("?"),
            "resumable upload initiated"
        );

        Ok(Self {
            transport,
            source,
            handle,
            options,
            tracker: None,
            state: UploadState::Probed { progress: 0 },
        })
    }

    /// Adopts an existing handle. The remote is probed on first use.
    pub async fn resume(
        transport: Arc<dyn ChunkedTransport>,
        source: &Path,
        handle: UploadHandle,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let source = ChunkReader::open(source).await?;
        debug!(handle = %handle, size = source.size(), "adopting resumable upload");
        Ok(Self {
            transport,
            source,
            handle,
            options,
            tracker: None,
            state: UploadState::Fresh,
        })
    }

    /// Adopts a persisted resume point, rejecting a source whose size changed.
    pub async fn resume_from(
        transport: Arc<dyn ChunkedTransport>,
        source: &Path,
        resume: ResumeState,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let session = Self::resume(transport, source, resume.handle, options).await?;
        if session.total_size() != resume.total_size {
            return Err(TransferError::SizeMismatch {
                expected: resume.total_size,
                actual: session.total_size(),
            });
        }
        Ok(session)
    }

    pub fn state(&self) -> &UploadState {
        &self.state
    }

    /// The resumable handle, or `None` once a mismatch invalidated it.
    pub fn handle(&self) -> Option<&UploadHandle> {
        match self.state {
            UploadState::Failed => None,
            _ => Some(&self.handle),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.source.size()
    }

    /// Progress without contacting the remote (0 while `Fresh`).
    pub fn known_progress(&self) -> u64 {
        match &self.state {
            UploadState::Fresh | UploadState::Failed => 0,
            UploadState::Probed { progress } | UploadState::Transferring { progress } => *progress,
            UploadState::Succeeded(_) => self.total_size(),
        }
    }

    /// Bytes the remote holds, probing it first if this session adopted a
    /// handle and has not asked yet.
    pub async fn current_progress(&mut self) -> Result<u64, TransferError> {
        match &self.state {
            UploadState::Fresh => self.probe().await,
            UploadState::Failed => Err(self.failed_error()),
            _ => Ok(self.known_progress()),
        }
    }

    /// Forgets local progress so the next call asks the remote again.
    ///
    /// Use after a transport error when it is unclear whether the last chunk
    /// arrived. The digest is rebuilt on the next chunk.
    pub fn reprobe(&mut self) -> Result<(), TransferError> {
        match self.state {
            UploadState::Failed => Err(self.failed_error()),
            UploadState::Succeeded(_) => Ok(()),
            _ => {
                self.transition(UploadState::Fresh);
                self.tracker = None;
                Ok(())
            }
        }
    }

    /// Resume point to persist, if the handle is still usable.
    pub fn resume_state(&self) -> Option<ResumeState> {
        self.handle().map(|handle| ResumeState {
            handle: handle.clone(),
            total_size: self.total_size(),
            bytes_transferred: self.known_progress(),
        })
    }

    /// Sends the next chunk and reports the confirmed progress.
    ///
    /// The first call after a resume replays bytes `[0, progress)` of the
    /// source to rebuild the digest, which costs O(progress). The observer is
    /// called once the remote confirms the chunk; a `Break` turns a pending
    /// report into [`ChunkStatus::Aborted`]. Completion always wins.
    pub async fn next_chunk(
        &mut self,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ChunkReport<ItemMetadata>, TransferError> {
        if self.state == UploadState::Fresh {
            self.probe().await?;
        }

        let progress = match &self.state {
            UploadState::Succeeded(item) => {
                return Ok(ChunkReport {
                    progress: self.snapshot(self.total_size()),
                    status: ChunkStatus::Complete(item.clone()),
                });
            }
            UploadState::Failed => return Err(self.failed_error()),
            UploadState::Fresh => {
                return Err(TransferError::InvalidState(
                    "upload progress unknown after probe".into(),
                ));
            }
            UploadState::Probed { progress } => {
                let progress = *progress;
                let tracker = match self
                    .source
                    .tracker_at(self.options.checksum, progress)
                    .await
                {
                    Ok(tracker) => tracker,
                    Err(e) => return Err(self.fail_on_mismatch(e)),
                };
                debug!(progress, "upload digest rebuilt");
                self.tracker = Some(tracker);
                self.transition(UploadState::Transferring { progress });
                progress
            }
            UploadState::Transferring { progress } => *progress,
        };

        if let Err(e) = self.source.ensure_unchanged().await {
            return Err(self.fail_on_mismatch(e));
        }

        let total = self.total_size();
        let len = self.options.chunk_len(total, progress);
        let data = match self.source.read_at(progress, len).await {
            Ok(data) => data,
            Err(e) => return Err(self.fail_on_mismatch(e)),
        };

        // Committed only once the remote confirms the chunk.
        let Some(mut candidate) = self.tracker.clone() else {
            return Err(TransferError::InvalidState(
                "transferring without a digest".into(),
            ));
        };
        candidate.feed(&data);

        let range = ContentRange::for_chunk(progress, len, total);
        debug!(range = %range, "sending chunk");
        let req = HttpRequest::put(self.handle.uri())
            .header(header::CONTENT_LENGTH, len.to_string())
            .header(header::CONTENT_RANGE, range.to_string())
            .body(data);
        let resp = self.transport.request(req).await?;
        let confirmed = progress + len;

        match resp.status {
            status::RESUME_INCOMPLETE => {
                // No `Range` header means the remote holds nothing yet.
                let acknowledged = match resp.header(header::RANGE) {
                    Some(ack) => acknowledged_bytes(ack)
                        .map_err(|e| TransportError::protocol("chunk upload", e.to_string()))?,
                    None => 0,
                };
                if len == 0 || acknowledged != confirmed {
                    return Err(TransportError::protocol(
                        "chunk upload",
                        format!("remote acknowledged {acknowledged} bytes, expected {confirmed}"),
                    )
                    .into());
                }

                if let Some(remote) = resp.header(header::X_RANGE_MD5) {
                    if candidate.algorithm() == ChecksumAlgorithm::Md5 && !candidate.matches(remote)
                    {
                        let err = TransferError::ChecksumMismatch {
                            expected: remote.to_string(),
                            actual: candidate.digest(),
                        };
                        return Err(self.fail_on_mismatch(err));
                    }
                }

                self.tracker = Some(candidate);
                self.transition(UploadState::Transferring {
                    progress: confirmed,
                });

                let snapshot = self.snapshot(confirmed);
                let status = match observer.on_progress(&snapshot) {
                    ControlFlow::Continue(()) => ChunkStatus::Pending,
                    ControlFlow::Break(()) => {
                        info!(progress = confirmed, total, "upload aborted by observer");
                        ChunkStatus::Aborted
                    }
                };
                Ok(ChunkReport {
                    progress: snapshot,
                    status,
                })
            }
            status::OK | status::CREATED => {
                if confirmed != total {
                    return Err(TransportError::protocol(
                        "chunk upload",
                        format!("remote finished the upload at {confirmed} of {total} bytes"),
                    )
                    .into());
                }
                let item: ItemMetadata = resp.json()?;

                if self.options.verify_completed_upload
                    && candidate.algorithm() == ChecksumAlgorithm::Md5
                    && let Some(remote) = item.md5_checksum.as_deref()
                    && !candidate.matches(remote)
                {
                    let err = TransferError::ChecksumMismatch {
                        expected: remote.to_string(),
                        actual: candidate.digest(),
                    };
                    return Err(self.fail_on_mismatch(err));
                }

                info!(id = %item.id, size = total, "upload complete");
                self.tracker = Some(candidate);
                self.transition(UploadState::Succeeded(item.clone()));

                let snapshot = self.snapshot(total);
                let _ = observer.on_progress(&snapshot);
                Ok(ChunkReport {
                    progress: snapshot,
                    status: ChunkStatus::Complete(item),
                })
            }
            _ => Err(TransportError::unexpected("chunk upload", &resp).into()),
        }
    }

    /// Sends chunks until the upload completes.
    ///
    /// An observer `Break` ends the loop with [`TransferError::Aborted`].
    pub async fn run(
        &mut self,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ItemMetadata, TransferError> {
        loop {
            let report = self.next_chunk(observer).await?;
            match report.status {
                ChunkStatus::Pending => continue,
                ChunkStatus::Complete(item) => return Ok(item),
                ChunkStatus::Aborted => {
                    return Err(TransferError::Aborted {
                        progress: report.progress,
                    });
                }
            }
        }
    }

    async fn probe(&mut self) -> Result<u64, TransferError> {
        let total = self.total_size();
        let req = HttpRequest::put(self.handle.uri())
            .header(header::CONTENT_LENGTH, "0")
            .header(header::CONTENT_RANGE, ContentRange::probe(total).to_string());
        let resp = self.transport.request(req).await?;

        match resp.status {
            status::OK | status::CREATED => {
                let item: ItemMetadata = resp.json()?;
                info!(id = %item.id, "remote reports upload already complete");
                self.transition(UploadState::Succeeded(item));
                Ok(total)
            }
            status::RESUME_INCOMPLETE => {
                let progress = match resp.header(header::RANGE) {
                    Some(value) => acknowledged_bytes(value)
                        .map_err(|e| TransportError::protocol("upload probe", e.to_string()))?,
                    None => 0,
                };
                if progress > total {
                    return Err(TransportError::protocol(
                        "upload probe",
                        format!("remote holds {progress} bytes of a {total}-byte upload"),
                    )
                    .into());
                }
                debug!(progress, total, "upload progress probed");
                self.transition(UploadState::Probed { progress });
                Ok(progress)
            }
            _ => Err(TransportError::unexpected("upload probe", &resp).into()),
        }
    }

    fn snapshot(&self, progress: u64) -> TransferProgress {
        TransferProgress::new(progress, self.total_size(), self.handle().cloned())
    }

    fn transition(&mut self, next: UploadState) {
        debug!(from = ?state_name(&self.state), to = ?state_name(&next), "upload state");
        self.state = next;
    }

    /// Mismatches poison the session; everything else leaves it intact.
    fn fail_on_mismatch(&mut self, err: TransferError) -> TransferError {
        if err.invalidates_handle() {
            warn!(error = %err, handle = %self.handle, "upload session invalidated");
            self.tracker = None;
            self.transition(UploadState::Failed);
        }
        err
    }

    fn failed_error(&self) -> TransferError {
        TransferError::InvalidState("upload session failed; start a new upload".into())
    }
}

fn state_name(state: &UploadState) -> &'static str {
    match state {
        UploadState::Fresh => "fresh",
        UploadState::Probed { .. } => "probed",
        UploadState::Transferring { .. } => "transferring",
        UploadState::Succeeded(_) => "succeeded",
        UploadState::Failed => "failed",
    }
}
