//! Ranged download session.
//!
//! Fetches one remote object into an append-only local sink with `Range`
//! requests. Whatever the sink already holds is treated as a downloaded
//! prefix, so reopening a session over a partial file resumes it. Once the
//! sink reaches the remote size its digest is compared with the remote's.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use driveport_protocol::constants::{header, status};
use driveport_protocol::{ByteRange, ContentRange, HttpRequest, HttpResponse, ItemMetadata};
use tracing::{debug, info, warn};

use crate::chunked::ChunkWriter;
use crate::error::{TransferError, TransportError};
use crate::integrity::{ChecksumAlgorithm, IntegrityTracker};
use crate::progress::{ProgressObserver, TransferProgress};
use crate::transport::ChunkedTransport;
use crate::{ChunkReport, ChunkStatus, TransferOptions};

/// What a download needs to know about the remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub id: String,
    pub size: u64,
    /// MD5 hex digest reported by the remote. Missing for some object kinds.
    pub checksum: Option<String>,
}

impl RemoteObject {
    /// Builds the download target from item metadata.
    ///
    /// Fails if the remote did not report a size, which is the case for
    /// folders and native documents.
    pub fn from_metadata(item: &ItemMetadata) -> Result<Self, TransferError> {
        let size = item.size.ok_or_else(|| {
            TransferError::InvalidState(format!("item {} has no downloadable size", item.id))
        })?;
        Ok(Self {
            id: item.id.clone(),
            size,
            checksum: item.md5_checksum.clone(),
        })
    }
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub size: u64,
    /// Hex digest of the sink, in the session's checksum algorithm.
    pub checksum: String,
    /// `false` when the remote reported no comparable checksum.
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    /// Sink opened, or resynced after a failed write; its digest has not
    /// been rebuilt yet.
    Fresh { progress: u64 },
    /// Digest covers `[0, progress)` of the sink.
    Transferring { progress: u64 },
    Succeeded(DownloadedFile),
    /// Checksum or size mismatch. The sink must be discarded.
    Failed,
}

/// Drives one ranged download.
pub struct DownloadSession {
    transport: Arc<dyn ChunkedTransport>,
    media_url: String,
    remote: RemoteObject,
    sink: ChunkWriter,
    options: TransferOptions,
    tracker: Option<IntegrityTracker>,
    state: DownloadState,
}

impl DownloadSession {
    /// Opens (or creates) the sink at `sink_path`.
    ///
    /// Progress starts at the sink's current length. No request is made.
    pub async fn open(
        transport: Arc<dyn ChunkedTransport>,
        media_url: impl Into<String>,
        remote: RemoteObject,
        sink_path: &Path,
        options: TransferOptions,
    ) -> Result<Self, TransferError> {
        let sink = ChunkWriter::open(sink_path).await?;
        let progress = sink.len();
        debug!(
            id = %remote.id,
            path = %sink_path.display(),
            progress,
            total = remote.size,
            "download session opened"
        );
        Ok(Self {
            transport,
            media_url: media_url.into(),
            remote,
            sink,
            options,
            tracker: None,
            state: DownloadState::Fresh { progress },
        })
    }

    pub fn state(&self) -> &DownloadState {
        &self.state
    }

    pub fn remote(&self) -> &RemoteObject {
        &self.remote
    }

    pub fn sink_path(&self) -> &Path {
        self.sink.path()
    }

    pub fn total_size(&self) -> u64 {
        self.remote.size
    }

    /// Bytes already in the sink.
    pub fn current_progress(&self) -> u64 {
        self.sink.len()
    }

    /// Fetches the next range, or verifies the sink once it is complete.
    pub async fn next_chunk(
        &mut self,
        observer: &mut dyn ProgressObserver,
    ) -> Result<ChunkReport<DownloadedFile>, TransferError> {
        let progress = match &self.state {
            DownloadState::Succeeded(done) => {
                return Ok(ChunkReport {
                    progress: self.snapshot(),
                    status: ChunkStatus::Complete(done.clone()),
                });
            }
            DownloadState::Failed => {
                return Err(TransferError::InvalidState(
                    "download session failed; discard the sink".into(),
                ));
            }
            DownloadState::Fresh { progress } => {
                let progress = *progress;
                let tracker = self.sink.tracker_at(self.options.checksum, progress).await?;
                self.tracker = Some(tracker);
                if progress > self.remote.size {
                    let err = self.oversized_sink_error();
                    return Err(self.fail(err));
                }
                self.state = DownloadState::Transferring { progress };
                progress
            }
            DownloadState::Transferring { progress } => {
                let progress = *progress;
                let on_disk = self.sink.disk_len().await?;
                if on_disk != progress {
                    let err = TransferError::SizeMismatch {
                        expected: progress,
                        actual: on_disk,
                    };
                    return Err(self.fail(err));
                }
                progress
            }
        };

        let total = self.remote.size;
        if progress == total {
            let done = self.finish().await?;
            return Ok(ChunkReport {
                progress: self.snapshot(),
                status: ChunkStatus::Complete(done),
            });
        }

        let len = self.options.chunk_len(total, progress);
        let range = ByteRange::from_offset(progress, len);
        debug!(range = %range, "requesting range");
        let req = HttpRequest::get(&self.media_url).header(header::RANGE, range.to_string());
        let resp = self.transport.request(req).await?;
        let body = check_range_response(&resp, progress, len, total)?;

        if let Err(e) = self.sink.append(body).await {
            return Err(self.interrupted_write(e).await);
        }
        let Some(tracker) = self.tracker.as_mut() else {
            return Err(TransferError::InvalidState(
                "transferring without a digest".into(),
            ));
        };
        tracker.feed(body);
        let progress = self.sink.len();
        self.state = DownloadState::Transferring { progress };

        if progress == total {
            let done = self.finish().await?;
            let snapshot = self.snapshot();
            let _ = observer.on_progress(&snapshot);
            return Ok(ChunkReport {
                progress: snapshot,
                status: ChunkStatus::Complete(done),
            });
        }

        let snapshot = self.snapshot();
        let status = match observer.on_progress(&snapshot) {
            ControlFlow::Continue(()) => ChunkStatus::Pending,
            ControlFlow::Break(()) => {
                info!(progress, total, "download aborted by observer");
                ChunkStatus::Aborted
            }
        };
        Ok(ChunkReport {
            progress: snapshot,
            status,
        })
    }

    /// Fetches ranges until the sink is complete and verified.
    pub async fn run(
        &mut self,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DownloadedFile, TransferError> {
        loop {
            let report = self.next_chunk(observer).await?;
            match report.status {
                ChunkStatus::Pending => continue,
                ChunkStatus::Complete(done) => return Ok(done),
                ChunkStatus::Aborted => {
                    return Err(TransferError::Aborted {
                        progress: report.progress,
                    });
                }
            }
        }
    }

    /// Re-reads the complete sink from disk and compares it with the bytes
    /// received and with the remote checksum.
    async fn finish(&mut self) -> Result<DownloadedFile, TransferError> {
        let Some(received) = self.tracker.as_ref().map(IntegrityTracker::digest) else {
            return Err(TransferError::InvalidState(
                "finishing without a digest".into(),
            ));
        };

        let total = self.remote.size;
        let on_disk = self.sink.disk_len().await?;
        if on_disk != total {
            let err = TransferError::SizeMismatch {
                expected: total,
                actual: on_disk,
            };
            return Err(self.fail(err));
        }
        let tracker = self.sink.tracker_at(self.options.checksum, total).await?;
        let actual = tracker.digest();
        if actual != received {
            let err = TransferError::ChecksumMismatch {
                expected: received,
                actual,
            };
            return Err(self.fail(err));
        }

        let verified = match self.remote.checksum.as_deref() {
            Some(expected) if tracker.algorithm() == ChecksumAlgorithm::Md5 => {
                if !tracker.matches(expected) {
                    let err = TransferError::ChecksumMismatch {
                        expected: expected.to_string(),
                        actual,
                    };
                    return Err(self.fail(err));
                }
                true
            }
            Some(_) => {
                warn!(id = %self.remote.id, "remote checksum is md5 but the session digest is not; skipping verification");
                false
            }
            None => {
                warn!(id = %self.remote.id, "remote reported no checksum; skipping verification");
                false
            }
        };

        let done = DownloadedFile {
            path: self.sink.path().to_path_buf(),
            size: on_disk,
            checksum: actual,
            verified,
        };
        info!(id = %self.remote.id, size = done.size, verified, "download complete");
        self.state = DownloadState::Succeeded(done.clone());
        Ok(done)
    }

    /// A failed append may leave part of the body on disk. The bytes that
    /// did land are still a valid prefix, so the next call rebuilds the
    /// digest from whatever the sink now holds.
    async fn interrupted_write(&mut self, err: TransferError) -> TransferError {
        match self.sink.resync().await {
            Ok(progress) => {
                warn!(error = %err, progress, "sink write failed; resuming from disk length");
                self.tracker = None;
                self.state = DownloadState::Fresh { progress };
                err
            }
            Err(resync) => {
                warn!(error = %resync, "sink length unreadable after a failed write");
                self.fail(err)
            }
        }
    }

    fn oversized_sink_error(&self) -> TransferError {
        match (&self.remote.checksum, &self.tracker) {
            (Some(expected), Some(tracker)) => TransferError::ChecksumMismatch {
                expected: expected.clone(),
                actual: tracker.digest(),
            },
            _ => TransferError::SizeMismatch {
                expected: self.remote.size,
                actual: self.sink.len(),
            },
        }
    }

    fn fail(&mut self, err: TransferError) -> TransferError {
        warn!(error = %err, path = %self.sink.path().display(), "download session failed");
        self.tracker = None;
        self.state = DownloadState::Failed;
        err
    }

    fn snapshot(&self) -> TransferProgress {
        TransferProgress::new(self.sink.len().min(self.remote.size), self.remote.size, None)
    }
}

/// Validates a ranged response and returns the bytes to append.
fn check_range_response(
    resp: &HttpResponse,
    offset: u64,
    requested: u64,
    total: u64,
) -> Result<&[u8], TransportError> {
    let whole_object = resp.status == status::OK && offset == 0 && requested == total;
    if resp.status != status::PARTIAL_CONTENT && !whole_object {
        return Err(TransportError::unexpected("ranged download", resp));
    }

    let body = resp.body.as_slice();
    let received = body.len() as u64;
    if received == 0 {
        return Err(TransportError::protocol("ranged download", "empty range body"));
    }
    if received > requested {
        return Err(TransportError::protocol(
            "ranged download",
            format!("received {received} bytes for a {requested}-byte range"),
        ));
    }
    if let Some(declared) = resp.content_length()
        && declared != received
    {
        return Err(TransportError::protocol(
            "ranged download",
            format!("Content-Length {declared} but body holds {received} bytes"),
        ));
    }
    if let Some(value) = resp.header(header::CONTENT_RANGE) {
        let range: ContentRange = value
            .parse()
            .map_err(|e: driveport_protocol::RangeError| {
                TransportError::protocol("ranged download", e.to_string())
            })?;
        if let ContentRange::Bytes { first, .. } = range
            && first != offset
        {
            return Err(TransportError::protocol(
                "ranged download",
                format!("range starts at {first}, expected {offset}"),
            ));
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::integrity::checksum_bytes;
    use crate::progress::NoProgress;
    use crate::testing::MockRemote;
    use crate::transport::TransportFuture;

    fn pattern(len: u64) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    async fn open(
        remote: &Arc<MockRemote>,
        item: &ItemMetadata,
        sink: &Path,
        chunk_size: u64,
    ) -> DownloadSession {
        DownloadSession::open(
            remote.clone(),
            remote.media_url(&item.id),
            RemoteObject::from_metadata(item).unwrap(),
            sink,
            TransferOptions::download().with_chunk_size(chunk_size),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn downloads_round_trip_across_chunk_sizes() {
        for size in [1u64, 999, 1000, 1001, 4321] {
            for chunk in [1000u64, 4096, 0] {
                let data = pattern(size);
                let remote = Arc::new(MockRemote::new());
                let item = remote.insert_file("data.bin", "root", &data);
                let dir = TempDir::new().unwrap();
                let sink = dir.path().join("out.bin");

                let mut session = open(&remote, &item, &sink, chunk).await;
                let done = session.run(&mut NoProgress).await.unwrap();

                assert_eq!(std::fs::read(&sink).unwrap(), data, "size {size}, chunk {chunk}");
                assert!(done.verified);
                assert_eq!(done.size, size);
                assert_eq!(done.checksum, checksum_bytes(ChecksumAlgorithm::Md5, &data));
            }
        }
    }

    #[tokio::test]
    async fn zero_size_object_needs_no_requests() {
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("empty", "root", b"");
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("empty");

        let mut calls = 0;
        let mut observer = |_: &TransferProgress| {
            calls += 1;
            ControlFlow::Continue(())
        };
        let mut session = open(&remote, &item, &sink, 1000).await;
        let report = session.next_chunk(&mut observer).await.unwrap();

        assert!(report.status.is_complete());
        assert_eq!(calls, 0);
        assert_eq!(remote.ranged_get_count(), 0);
        assert!(sink.exists());
    }

    #[tokio::test]
    async fn requests_consecutive_ranges() {
        let data = pattern(2500);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        let dir = TempDir::new().unwrap();

        let mut session = open(&remote, &item, &dir.path().join("out"), 1000).await;
        session.run(&mut NoProgress).await.unwrap();

        let ranges: Vec<_> = remote.requests().into_iter().filter_map(|r| r.range).collect();
        assert_eq!(ranges, vec!["bytes=0-999", "bytes=1000-1999", "bytes=2000-2499"]);
    }

    #[tokio::test]
    async fn resumes_from_existing_sink() {
        let data = pattern(3000);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("out.bin");

        let mut session = open(&remote, &item, &sink, 1000).await;
        let mut stop = |_: &TransferProgress| ControlFlow::Break(());
        let err = session.run(&mut stop).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Aborted { ref progress } if progress.bytes_transferred == 1000
        ));
        drop(session);

        remote.clear_requests();
        let mut resumed = open(&remote, &item, &sink, 1000).await;
        assert_eq!(resumed.current_progress(), 1000);
        let done = resumed.run(&mut NoProgress).await.unwrap();

        assert_eq!(remote.ranged_get_count(), 2);
        assert!(done.verified);
        assert_eq!(std::fs::read(&sink).unwrap(), data);
    }

    #[tokio::test]
    async fn checksum_mismatch_fails_the_session() {
        let data = pattern(1500);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        remote.set_checksum(&item.id, Some("0123456789abcdef0123456789abcdef"));
        let item = remote.file(&item.id).unwrap().0;
        let dir = TempDir::new().unwrap();

        let mut session = open(&remote, &item, &dir.path().join("out"), 1000).await;
        let err = session.run(&mut NoProgress).await.unwrap_err();

        assert!(matches!(err, TransferError::ChecksumMismatch { .. }));
        assert_eq!(session.state(), &DownloadState::Failed);
        assert!(session.next_chunk(&mut NoProgress).await.is_err());
    }

    #[tokio::test]
    async fn sink_grown_between_chunks_fails_the_session() {
        let data = pattern(3000);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("out.bin");

        let mut session = open(&remote, &item, &sink, 1000).await;
        let report = session.next_chunk(&mut NoProgress).await.unwrap();
        assert_eq!(report.progress.bytes_transferred, 1000);

        let mut stray = std::fs::OpenOptions::new().append(true).open(&sink).unwrap();
        std::io::Write::write_all(&mut stray, b"x").unwrap();
        drop(stray);

        let err = session.run(&mut NoProgress).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                expected: 1000,
                actual: 1001
            }
        ));
        assert_eq!(session.state(), &DownloadState::Failed);
        assert_eq!(remote.ranged_get_count(), 1);
    }

    #[tokio::test]
    async fn sink_rewritten_in_place_is_caught_on_completion() {
        let data = pattern(3000);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        remote.set_checksum(&item.id, None);
        let item = remote.file(&item.id).unwrap().0;
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("out.bin");

        let mut session = open(&remote, &item, &sink, 1000).await;
        session.next_chunk(&mut NoProgress).await.unwrap();
        session.next_chunk(&mut NoProgress).await.unwrap();

        let mut bytes = std::fs::read(&sink).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&sink, &bytes).unwrap();

        let err = session.next_chunk(&mut NoProgress).await.unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch { .. }));
        assert_eq!(session.state(), &DownloadState::Failed);
    }

    #[tokio::test]
    async fn completed_download_reports_the_length_on_disk() {
        let data = pattern(2500);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("out.bin");

        let mut session = open(&remote, &item, &sink, 1000).await;
        let done = session.run(&mut NoProgress).await.unwrap();
        assert_eq!(done.size, std::fs::metadata(&sink).unwrap().len());
        assert_eq!(std::fs::read(&sink).unwrap(), data);
    }

    #[tokio::test]
    async fn missing_remote_checksum_skips_verification() {
        let data = pattern(10);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("doc", "root", &data);
        remote.set_checksum(&item.id, None);
        let item = remote.file(&item.id).unwrap().0;
        let dir = TempDir::new().unwrap();

        let mut session = open(&remote, &item, &dir.path().join("doc"), 0).await;
        let done = session.run(&mut NoProgress).await.unwrap();
        assert!(!done.verified);
    }

    #[tokio::test]
    async fn oversized_sink_is_rejected() {
        let data = pattern(10);
        let remote = Arc::new(MockRemote::new());
        let item = remote.insert_file("data.bin", "root", &data);
        let dir = TempDir::new().unwrap();
        let sink = dir.path().join("out");
        std::fs::write(&sink, pattern(20)).unwrap();

        let mut session = open(&remote, &item, &sink, 0).await;
        let err = session.next_chunk(&mut NoProgress).await.unwrap_err();
        assert!(matches!(err, TransferError::ChecksumMismatch { .. }));

        remote.set_checksum(&item.id, None);
        let item = remote.file(&item.id).unwrap().0;
        let mut session = open(&remote, &item, &sink, 0).await;
        let err = session.next_chunk(&mut NoProgress).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                expected: 10,
                actual: 20
            }
        ));
        assert_eq!(remote.ranged_get_count(), 0);
    }

    #[tokio::test]
    async fn unknown_object_is_a_transport_error() {
        let remote = Arc::new(MockRemote::new());
        let dir = TempDir::new().unwrap();
        let mut session = DownloadSession::open(
            remote.clone(),
            remote.media_url("missing"),
            RemoteObject {
                id: "missing".into(),
                size: 5,
                checksum: None,
            },
            &dir.path().join("out"),
            TransferOptions::download(),
        )
        .await
        .unwrap();

        let err = session.next_chunk(&mut NoProgress).await.unwrap_err();
        assert!(matches!(err, TransferError::Transport(ref t) if t.status() == Some(404)));
        assert_eq!(session.state(), &DownloadState::Transferring { progress: 0 });
    }

    /// Answers every request with the same response.
    struct Fixed(HttpResponse);

    impl ChunkedTransport for Fixed {
        fn request(&self, _request: HttpRequest) -> TransportFuture<'_> {
            let resp = self.0.clone();
            Box::pin(async move { Ok(resp) })
        }
    }

    async fn first_chunk_with(resp: HttpResponse) -> Result<ChunkReport<DownloadedFile>, TransferError> {
        let dir = TempDir::new().unwrap();
        let mut session = DownloadSession::open(
            Arc::new(Fixed(resp)),
            "https://mock.local/drive/v3/files/x?alt=media",
            RemoteObject {
                id: "x".into(),
                size: 8,
                checksum: None,
            },
            &dir.path().join("out"),
            TransferOptions::download().with_chunk_size(4),
        )
        .await
        .unwrap();
        session.next_chunk(&mut NoProgress).await
    }

    #[tokio::test]
    async fn rejects_malformed_range_responses() {
        let misplaced = HttpResponse::new(206)
            .with_header("Content-Range", "bytes 4-7/8")
            .with_body(b"abcd".to_vec());
        assert!(matches!(
            first_chunk_with(misplaced).await,
            Err(TransferError::Transport(TransportError::Protocol { .. }))
        ));

        let oversized = HttpResponse::new(206).with_body(b"abcdefgh".to_vec());
        assert!(first_chunk_with(oversized).await.is_err());

        let empty = HttpResponse::new(206);
        assert!(first_chunk_with(empty).await.is_err());

        let short = HttpResponse::new(206)
            .with_header("Content-Length", "4")
            .with_body(b"abc".to_vec());
        assert!(first_chunk_with(short).await.is_err());

        let partial = HttpResponse::new(206).with_body(b"ab".to_vec());
        let report = first_chunk_with(partial).await.unwrap();
        assert_eq!(report.progress.bytes_transferred, 2);
    }

    #[test]
    fn folders_are_not_downloadable() {
        let folder = ItemMetadata {
            id: "f".into(),
            name: "dir".into(),
            mime_type: driveport_protocol::constants::FOLDER_MIME_TYPE.into(),
            parents: vec![],
            size: None,
            md5_checksum: None,
        };
        assert!(matches!(
            RemoteObject::from_metadata(&folder),
            Err(TransferError::InvalidState(_))
        ));
    }
}
