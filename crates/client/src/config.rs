//! Client configuration.
//!
//! Stored as TOML. Every field has a default, so a partial file (or none at
//! all) is valid:
//!
//! ```toml
//! upload_chunk_size = 5242880
//! checksum = "md5"
//! ```

use std::path::Path;

use driveport_protocol::{DEFAULT_API_BASE, DEFAULT_UPLOAD_BASE};
use driveport_transfer::{
    ChecksumAlgorithm, DEFAULT_DOWNLOAD_CHUNK_SIZE, DEFAULT_UPLOAD_CHUNK_SIZE, TransferOptions,
};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Base URL for metadata and media requests.
    pub api_base: String,

    /// Base URL for resumable uploads.
    pub upload_base: String,

    /// Bytes per upload request; `0` sends the file in one request.
    pub upload_chunk_size: u64,

    /// Bytes per download range; `0` fetches the object in one request.
    pub download_chunk_size: u64,

    pub checksum: ChecksumAlgorithm,

    /// Compare the final upload digest with the checksum the remote returns.
    pub verify_completed_upload: bool,

    /// Per-request timeout in seconds. `0` disables it.
    pub request_timeout_secs: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            upload_base: DEFAULT_UPLOAD_BASE.into(),
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            checksum: ChecksumAlgorithm::Md5,
            verify_completed_upload: false,
            request_timeout_secs: 300,
        }
    }
}

impl DriveConfig {
    /// Loads configuration from `path`, or returns defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ClientError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn upload_options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.upload_chunk_size,
            checksum: self.checksum,
            verify_completed_upload: self.verify_completed_upload,
        }
    }

    pub fn download_options(&self) -> TransferOptions {
        TransferOptions {
            chunk_size: self.download_chunk_size,
            checksum: self.checksum,
            verify_completed_upload: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config() {
        let config = DriveConfig::default();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.upload_chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.download_chunk_size, 10_000_000);
        assert_eq!(config.checksum, ChecksumAlgorithm::Md5);
        assert!(!config.verify_completed_upload);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DriveConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DriveConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("driveport.toml");
        std::fs::write(&path, "upload_chunk_size = 524288\nchecksum = \"sha256\"\n").unwrap();

        let config = DriveConfig::load(&path).unwrap();
        assert_eq!(config.upload_chunk_size, 524_288);
        assert_eq!(config.checksum, ChecksumAlgorithm::Sha256);
        assert_eq!(config.download_chunk_size, 10_000_000);
        assert_eq!(config.upload_options().chunk_size, 524_288);
        assert_eq!(config.download_options().checksum, ChecksumAlgorithm::Sha256);
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/driveport.toml");
        let config = DriveConfig {
            verify_completed_upload: true,
            upload_chunk_size: 0,
            ..DriveConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(DriveConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "upload_chunk_size = \"lots\"").unwrap();
        assert!(matches!(
            DriveConfig::load(&path),
            Err(ClientError::ConfigParse(_))
        ));
    }
}
