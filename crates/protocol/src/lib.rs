//! Wire vocabulary for the Drive REST API.
//!
//! Holds the transport-neutral request/response values, the range header
//! codecs used by resumable uploads and ranged downloads, item metadata and
//! the resumable upload handle. No I/O happens here.

pub mod constants;
pub mod handle;
pub mod http;
pub mod metadata;
pub mod range;

// Re-export primary types for convenience.
pub use constants::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE, UPLOAD_GRANULARITY};
pub use handle::UploadHandle;
pub use http::{Headers, HttpRequest, HttpResponse, Method};
pub use metadata::{DriveItem, ItemMetadata, UploadMetadata};
pub use range::{ByteRange, ContentRange, RangeError, acknowledged_bytes};
