//! Incremental content digests.
//!
//! An [`IntegrityTracker`] hashes bytes as they are confirmed. After a resume
//! it is rebuilt with [`IntegrityTracker::reseed`], which replays the already
//! transferred prefix from the authoritative local copy. That replay costs
//! O(progress) and happens once per session.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read buffer used when replaying a prefix.
const RESEED_BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithm. Must match whatever the remote reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha256,
}

#[derive(Clone)]
enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn hex_digest(&self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.clone().finalize()),
            Hasher::Sha256(h) => hex::encode(h.clone().finalize()),
        }
    }
}

/// Running digest over the bytes of one session.
#[derive(Clone)]
pub struct IntegrityTracker {
    algorithm: ChecksumAlgorithm,
    hasher: Hasher,
    bytes_seen: u64,
}

impl std::fmt::Debug for IntegrityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityTracker")
            .field("algorithm", &self.algorithm)
            .field("bytes_seen", &self.bytes_seen)
            .finish()
    }
}

impl IntegrityTracker {
    /// Creates a tracker that has seen no bytes.
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            hasher: Hasher::new(algorithm),
            bytes_seen: 0,
        }
    }

    /// Builds a tracker positioned at `offset` by hashing exactly `offset`
    /// bytes read from `source`.
    ///
    /// Fails with `UnexpectedEof` if `source` is shorter than `offset`.
    pub async fn reseed<R>(
        algorithm: ChecksumAlgorithm,
        source: &mut R,
        offset: u64,
    ) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut tracker = Self::new(algorithm);
        let mut buf = vec![0u8; RESEED_BUFFER_SIZE];
        let mut remaining = offset;

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "source ended after {} of {offset} bytes",
                        offset - remaining
                    ),
                ));
            }
            tracker.feed(&buf[..n]);
            remaining -= n as u64;
        }

        Ok(tracker)
    }

    /// Adds bytes to the digest.
    pub fn feed(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_seen += data.len() as u64;
    }

    /// Hex digest of everything fed so far. Does not reset the tracker.
    pub fn digest(&self) -> String {
        self.hasher.hex_digest()
    }

    /// Compares against a digest reported by the remote (case-insensitive).
    pub fn matches(&self, remote_digest: &str) -> bool {
        self.digest().eq_ignore_ascii_case(remote_digest.trim())
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }
}

/// Hex digest of `data` in one call.
pub fn checksum_bytes(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut tracker = IntegrityTracker::new(algorithm);
    tracker.feed(data);
    tracker.digest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            checksum_bytes(ChecksumAlgorithm::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            checksum_bytes(ChecksumAlgorithm::Sha256, b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn incremental_equals_one_shot() {
        let mut tracker = IntegrityTracker::new(ChecksumAlgorithm::Md5);
        tracker.feed(b"The quick brown ");
        tracker.feed(b"fox jumps over the lazy dog");
        assert_eq!(tracker.digest(), "9e107d9d372bb6826bd81d3542a419d6");
        assert_eq!(tracker.bytes_seen(), 43);
    }

    #[test]
    fn digest_does_not_consume() {
        let mut tracker = IntegrityTracker::new(ChecksumAlgorithm::Sha256);
        tracker.feed(b"abc");
        let first = tracker.digest();
        assert_eq!(first, tracker.digest());
        tracker.feed(b"def");
        assert_eq!(
            tracker.digest(),
            checksum_bytes(ChecksumAlgorithm::Sha256, b"abcdef")
        );
    }

    #[test]
    fn matches_ignores_case() {
        let mut tracker = IntegrityTracker::new(ChecksumAlgorithm::Md5);
        tracker.feed(b"");
        assert!(tracker.matches("D41D8CD98F00B204E9800998ECF8427E"));
        assert!(!tracker.matches("00000000000000000000000000000000"));
    }

    #[tokio::test]
    async fn reseed_then_continue_equals_uninterrupted() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let offset = 131_072u64;

        let mut reader = &data[..];
        let mut resumed = IntegrityTracker::reseed(ChecksumAlgorithm::Md5, &mut reader, offset)
            .await
            .unwrap();
        assert_eq!(resumed.bytes_seen(), offset);
        resumed.feed(&data[offset as usize..]);

        assert_eq!(
            resumed.digest(),
            checksum_bytes(ChecksumAlgorithm::Md5, &data)
        );
    }

    #[tokio::test]
    async fn reseed_reads_only_the_prefix() {
        let data = b"0123456789";
        let mut reader = &data[..];
        let tracker = IntegrityTracker::reseed(ChecksumAlgorithm::Md5, &mut reader, 4)
            .await
            .unwrap();
        assert_eq!(tracker.digest(), checksum_bytes(ChecksumAlgorithm::Md5, b"0123"));
    }

    #[tokio::test]
    async fn reseed_short_source_fails() {
        let data = b"short";
        let mut reader = &data[..];
        let err = IntegrityTracker::reseed(ChecksumAlgorithm::Md5, &mut reader, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn algorithm_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChecksumAlgorithm::Sha256).unwrap(),
            r#""sha256""#
        );
        assert_eq!(ChecksumAlgorithm::default(), ChecksumAlgorithm::Md5);
    }
}
