//! Persisted upload resume points.
//!
//! A record ties the resumable handle to the local source and destination it
//! was created for, so a later run can refuse to resume a different upload.

use std::path::{Path, PathBuf};

use driveport_protocol::UploadMetadata;
use driveport_transfer::ResumeState;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub source: PathBuf,
    pub destination: UploadMetadata,
    pub state: ResumeState,
}

impl ResumeRecord {
    /// Returns `true` if this record was written for `source` → `destination`.
    pub fn matches(&self, source: &Path, destination: &UploadMetadata) -> bool {
        self.source == source && &self.destination == destination
    }
}

/// JSON file holding at most one resume record.
#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored record, if any.
    pub fn load(&self) -> Result<Option<ResumeRecord>, ClientError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Replaces the stored record.
    pub fn save(&self, record: &ResumeRecord) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        // Atomic replace.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(
            path = %self.path.display(),
            bytes = record.state.bytes_transferred,
            "resume point saved"
        );
        Ok(())
    }

    /// Removes the stored record. A missing file is not an error.
    pub fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
