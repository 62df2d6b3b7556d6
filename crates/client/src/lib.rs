//! Drive facade over the transfer core.
//!
//! [`DriveClient`] resolves items, opens upload and download sessions with the
//! configured chunk sizes, and hands them a [`ReqwestTransport`]. Anything
//! implementing [`driveport_transfer::ChunkedTransport`] can stand in for it.

pub mod config;
pub mod drive;
pub mod error;
pub mod resume;
pub mod transport;

pub use config::DriveConfig;
pub use drive::DriveClient;
pub use error::ClientError;
pub use resume::{ResumeRecord, ResumeStore};
pub use transport::ReqwestTransport;
