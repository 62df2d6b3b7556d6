//! Endpoints, status codes and header names used by the Drive REST API.

/// Base URL for metadata and media requests.
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Base URL for resumable upload initiation and continuation.
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// MIME type the remote uses to flag a folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Fields requested when resolving an item.
pub const DEFAULT_ITEM_FIELDS: &str = "id, name, mimeType, parents";

/// Fields requested when preparing a download.
pub const DOWNLOAD_FIELDS: &str = "id, name, mimeType, parents, size, md5Checksum";

/// Content type of JSON request bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Every non-final upload chunk must be a multiple of this many bytes.
///
/// The remote enforces the rule; a smaller chunk is rejected per request.
pub const UPLOAD_GRANULARITY: u64 = 256 * 1024;

/// HTTP status codes with a protocol meaning.
pub mod status {
    /// Request succeeded; for uploads, the object is complete.
    pub const OK: u16 = 200;
    /// Upload complete, object created.
    pub const CREATED: u16 = 201;
    /// A byte range of the object was returned.
    pub const PARTIAL_CONTENT: u16 = 206;
    /// Resumable upload accepted the bytes and expects more.
    pub const RESUME_INCOMPLETE: u16 = 308;
    /// Unknown upload id or file id.
    pub const NOT_FOUND: u16 = 404;
}

/// Header names, in the spelling the remote documents.
pub mod header {
    pub const AUTHORIZATION: &str = "Authorization";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_RANGE: &str = "Content-Range";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const LOCATION: &str = "Location";
    pub const RANGE: &str = "Range";
    /// MD5 of every byte the remote has received for a resumable upload.
    pub const X_RANGE_MD5: &str = "X-Range-MD5";
}

/// URL that initiates a resumable upload.
pub fn resumable_initiate_url(upload_base: &str) -> String {
    format!("{}/files?uploadType=resumable", upload_base.trim_end_matches('/'))
}

/// URL that streams an object's content.
pub fn media_url(api_base: &str, file_id: &str) -> String {
    format!("{}/files/{file_id}?alt=media", api_base.trim_end_matches('/'))
}

/// URL of an item's metadata resource (without query).
pub fn item_url(api_base: &str, file_id: &str) -> String {
    format!("{}/files/{file_id}", api_base.trim_end_matches('/'))
}
