//! Resumable upload handle.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Capability to continue one resumable upload.
///
/// Wraps the resumable URI returned by the initiation request. The URI is
/// bound to a remote `upload_id` and to the destination metadata supplied at
/// initiation. It stays valid across process restarts, but must not be driven
/// by two sessions at once: the remote keeps whichever bytes arrive last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadHandle(String);

impl UploadHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Rebuilds a handle from a bare upload id.
    pub fn from_upload_id(upload_base: &str, upload_id: &str) -> Self {
        let mut url = crate::constants::resumable_initiate_url(upload_base);
        url.push_str("&upload_id=");
        url.push_str(upload_id);
        Self(url)
    }

    /// The resumable URI.
    pub fn uri(&self) -> &str {
        &self.0
    }

    /// Extracts the `upload_id` query parameter, if the URI carries one.
    pub fn upload_id(&self) -> Option<String> {
        let url = url::Url::parse(&self.0).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == "upload_id")
            .map(|(_, v)| v.into_owned())
    }
}

impl fmt::Display for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_id_is_read_from_query() {
        let handle = UploadHandle::new(
            "https://www.googleapis.com/upload/drive/v3/files?uploadType=resumable&upload_id=ABC-123",
        );
        assert_eq!(handle.upload_id().as_deref(), Some("ABC-123"));
    }

    #[test]
    fn from_upload_id_builds_resumable_uri() {
        let handle = UploadHandle::from_upload_id(crate::DEFAULT_UPLOAD_BASE, "xyz");
        assert_eq!(
            handle.uri(),
            "https://www.googleapis.com/upload/drive/v3/files?uploadType=resumable&upload_id=xyz"
        );
        assert_eq!(handle.upload_id().as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_upload_id_is_none() {
        assert!(UploadHandle::new("not a url").upload_id().is_none());
        assert!(UploadHandle::new("https://example.test/x").upload_id().is_none());
    }

    #[test]
    fn serializes_as_plain_string() {
        let handle = UploadHandle::new("https://example.test/u?upload_id=1");
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, r#""https://example.test/u?upload_id=1""#);
        let back: UploadHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(back, handle);
    }
}
