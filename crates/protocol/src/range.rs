//! `Content-Range` and `Range` header codecs.
//!
//! Formats must match the remote byte for byte:
//!
//! - chunk upload: `Content-Range: bytes 0-262143/1048576`
//! - progress probe and empty finalization: `Content-Range: bytes */1048576`
//! - upload acknowledgment (response): `Range: bytes=0-262143`
//! - ranged download (request): `Range: bytes=0-9999999`

use std::fmt;
use std::str::FromStr;

/// Errors from parsing a range header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {header} header: {value:?}")]
pub struct RangeError {
    pub header: &'static str,
    pub value: String,
}

impl RangeError {
    fn new(header: &'static str, value: &str) -> Self {
        Self {
            header,
            value: value.to_string(),
        }
    }
}

/// Value of a `Content-Range` request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// Bytes `first..=last` of an object of `total` bytes.
    Bytes { first: u64, last: u64, total: u64 },
    /// No bytes attached; asks for status or finalizes a `total`-byte object.
    Unsatisfied { total: u64 },
}

impl ContentRange {
    /// Range for a chunk of `len` bytes at `offset`.
    ///
    /// A zero-length chunk becomes `bytes */total`.
    pub fn for_chunk(offset: u64, len: u64, total: u64) -> Self {
        if len == 0 {
            ContentRange::Unsatisfied { total }
        } else {
            ContentRange::Bytes {
                first: offset,
                last: offset + len - 1,
                total,
            }
        }
    }

    /// Range sent by a zero-length progress probe.
    pub fn probe(total: u64) -> Self {
        ContentRange::Unsatisfied { total }
    }

    pub fn total(&self) -> u64 {
        match self {
            ContentRange::Bytes { total, .. } | ContentRange::Unsatisfied { total } => *total,
        }
    }

    /// Number of bytes the range covers.
    pub fn len(&self) -> u64 {
        match self {
            ContentRange::Bytes { first, last, .. } => last - first + 1,
            ContentRange::Unsatisfied { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRange::Bytes { first, last, total } => {
                write!(f, "bytes {first}-{last}/{total}")
            }
            ContentRange::Unsatisfied { total } => write!(f, "bytes */{total}"),
        }
    }
}

impl FromStr for ContentRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RangeError::new("Content-Range", s);
        let rest = s.trim().strip_prefix("bytes ").ok_or_else(err)?;
        let (span, total) = rest.split_once('/').ok_or_else(err)?;
        let total: u64 = total.trim().parse().map_err(|_| err())?;

        if span.trim() == "*" {
            return Ok(ContentRange::Unsatisfied { total });
        }

        let (first, last) = span.split_once('-').ok_or_else(err)?;
        let first: u64 = first.trim().parse().map_err(|_| err())?;
        let last: u64 = last.trim().parse().map_err(|_| err())?;
        // A range ending at u64::MAX has no representable length.
        if last < first || last == u64::MAX {
            return Err(err());
        }
        Ok(ContentRange::Bytes { first, last, total })
    }
}

/// Inclusive byte range used by `Range` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

impl ByteRange {
    /// Range covering `len` bytes from `offset`. `len` must be non-zero.
    pub fn from_offset(offset: u64, len: u64) -> Self {
        debug_assert!(len > 0, "byte range must cover at least one byte");
        Self {
            first: offset,
            last: offset + len.max(1) - 1,
        }
    }

    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.first, self.last)
    }
}

impl FromStr for ByteRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RangeError::new("Range", s);
        let rest = s.trim().strip_prefix("bytes=").ok_or_else(err)?;
        let (first, last) = rest.split_once('-').ok_or_else(err)?;
        let first: u64 = first.trim().parse().map_err(|_| err())?;
        let last: u64 = last.trim().parse().map_err(|_| err())?;
        // A range ending at u64::MAX has no representable length.
        if last < first || last == u64::MAX {
            return Err(err());
        }
        Ok(ByteRange { first, last })
    }
}

/// Converts an upload acknowledgment (`Range: bytes=0-N`) into the number of
/// bytes the remote holds (`N + 1`).
///
/// The remote always acknowledges a prefix, so a range not starting at 0 is
/// rejected.
pub fn acknowledged_bytes(value: &str) -> Result<u64, RangeError> {
    let range: ByteRange = value.parse()?;
    if range.first != 0 {
        return Err(RangeError::new("Range", value));
    }
    range
        .last
        .checked_add(1)
        .ok_or_else(|| RangeError::new("Range", value))
}
