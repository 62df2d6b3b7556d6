use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::TransferError;
use crate::integrity::{ChecksumAlgorithm, IntegrityTracker};

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads an upload source at explicit offsets.
///
/// The size is captured at open time; every later read is checked against it
/// so that a file changed underfoot surfaces as [`TransferError::SizeMismatch`].
#[derive(Debug)]
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    size: u64,
}

impl ChunkReader {
    /// Opens `path` and records its current size.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    /// Size recorded at open time.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fails if the file's size differs from the one recorded at open.
    pub async fn ensure_unchanged(&self) -> Result<(), TransferError> {
        let actual = self.file.metadata().await?.len();
        if actual != self.size {
            return Err(TransferError::SizeMismatch {
                expected: self.size,
                actual,
            });
        }
        Ok(())
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub async fn read_at(&mut self, offset: u64, len: u64) -> Result<Vec<u8>, TransferError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        match self.file.read_exact(&mut buf).await {
            Ok(_) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(self.short_read().await),
            Err(e) => Err(e.into()),
        }
    }

    /// Rebuilds the digest of bytes `[0, offset)`. Costs O(offset).
    pub async fn tracker_at(
        &mut self,
        algorithm: ChecksumAlgorithm,
        offset: u64,
    ) -> Result<IntegrityTracker, TransferError> {
        self.file.seek(SeekFrom::Start(0)).await?;
        match IntegrityTracker::reseed(algorithm, &mut self.file, offset).await {
            Ok(tracker) => Ok(tracker),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(self.short_read().await),
            Err(e) => Err(e.into()),
        }
    }

    async fn short_read(&self) -> TransferError {
        let actual = match self.file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => return e.into(),
        };
        TransferError::SizeMismatch {
            expected: self.size,
            actual,
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Append-only download sink.
///
/// Never truncates: an existing file is treated as an already-downloaded
/// prefix and new chunks land after it.
#[derive(Debug)]
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
    len: u64,
}

impl ChunkWriter {
    /// Opens (or creates) `path` for appending.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
        })
    }

    /// Bytes currently in the sink.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `data` and flushes it.
    ///
    /// On failure part of `data` may already be on disk; call
    /// [`resync`](Self::resync) before appending again.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Length of the file as it is on disk now.
    pub async fn disk_len(&self) -> Result<u64, TransferError> {
        Ok(self.file.metadata().await?.len())
    }

    /// Re-reads the length from disk and returns it.
    pub async fn resync(&mut self) -> Result<u64, TransferError> {
        self.len = self.disk_len().await?;
        Ok(self.len)
    }

    /// Digest of the first `offset` bytes of the sink. Costs O(offset).
    pub async fn tracker_at(
        &self,
        algorithm: ChecksumAlgorithm,
        offset: u64,
    ) -> Result<IntegrityTracker, TransferError> {
        let mut reader = File::open(&self.path).await?;
        Ok(IntegrityTracker::reseed(algorithm, &mut reader, offset).await?)
    }
}
