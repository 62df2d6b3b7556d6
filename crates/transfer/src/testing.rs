//! In-memory remote that speaks the resumable upload and ranged download
//! protocol. Used by this crate's tests and, behind the `test-util` feature,
//! by dependent crates.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use driveport_protocol::constants::{FOLDER_MIME_TYPE, header, status};
use driveport_protocol::{
    ByteRange, ContentRange, HttpRequest, HttpResponse, ItemMetadata, Method, UPLOAD_GRANULARITY,
    UploadHandle, UploadMetadata,
};

use crate::error::TransportError;
use crate::integrity::{ChecksumAlgorithm, checksum_bytes};
use crate::transport::{ChunkedTransport, TransportFuture};

pub const MOCK_API_BASE: &str = "https://mock.local/drive/v3";
pub const MOCK_UPLOAD_BASE: &str = "https://mock.local/upload/drive/v3";

/// One request as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub content_range: Option<String>,
    pub range: Option<String>,
    pub body_len: usize,
}

impl RecordedRequest {
    /// A PUT that carried upload bytes (or finalized an empty object).
    pub fn is_upload_chunk(&self) -> bool {
        self.method == Method::Put
            && self
                .content_range
                .as_deref()
                .is_some_and(|cr| self.body_len > 0 || cr == "bytes */0")
    }

    /// A zero-length PUT asking for progress.
    pub fn is_probe(&self) -> bool {
        self.method == Method::Put && self.body_len == 0 && !self.is_upload_chunk()
    }

    pub fn is_ranged_get(&self) -> bool {
        self.method == Method::Get && self.range.is_some()
    }
}

/// Scripted failure for the next request.
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail before the remote sees the request.
    Refuse,
    /// Apply the request, then lose the response.
    DropResponse,
}

#[derive(Debug)]
struct PendingUpload {
    metadata: UploadMetadata,
    data: Vec<u8>,
    file_id: Option<String>,
}

#[derive(Debug)]
struct StoredFile {
    metadata: ItemMetadata,
    data: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    next_id: u64,
    granularity: u64,
    uploads: HashMap<String, PendingUpload>,
    files: HashMap<String, StoredFile>,
    requests: Vec<RecordedRequest>,
    faults: VecDeque<Fault>,
    corrupt_range_digest: bool,
}

/// In-memory remote.
#[derive(Debug)]
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                granularity: UPLOAD_GRANULARITY,
                uploads: HashMap::new(),
                files: HashMap::new(),
                requests: Vec::new(),
                faults: VecDeque::new(),
                corrupt_range_digest: false,
            }),
        }
    }

    /// Overrides the chunk granularity the remote enforces.
    pub fn with_granularity(self, granularity: u64) -> Self {
        self.lock().granularity = granularity;
        self
    }

    pub fn initiate_url(&self) -> String {
        driveport_protocol::constants::resumable_initiate_url(MOCK_UPLOAD_BASE)
    }

    pub fn media_url(&self, id: &str) -> String {
        driveport_protocol::constants::media_url(MOCK_API_BASE, id)
    }

    /// Stores a file and returns its metadata, checksum included.
    pub fn insert_file(&self, name: &str, parent: &str, data: &[u8]) -> ItemMetadata {
        let mut state = self.lock();
        let id = state.allocate("file");
        let metadata = file_metadata(&id, name, vec![parent.to_string()], data);
        state.files.insert(
            id,
            StoredFile {
                metadata: metadata.clone(),
                data: data.to_vec(),
            },
        );
        metadata
    }

    pub fn insert_folder(&self, name: &str, parent: Option<&str>) -> ItemMetadata {
        let mut state = self.lock();
        let id = state.allocate("folder");
        let metadata = ItemMetadata {
            id: id.clone(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            size: None,
            md5_checksum: None,
        };
        state.files.insert(
            id,
            StoredFile {
                metadata: metadata.clone(),
                data: Vec::new(),
            },
        );
        metadata
    }

    /// Replaces the checksum the remote reports for `id`.
    pub fn set_checksum(&self, id: &str, checksum: Option<&str>) {
        if let Some(file) = self.lock().files.get_mut(id) {
            file.metadata.md5_checksum = checksum.map(str::to_string);
        }
    }

    pub fn file(&self, id: &str) -> Option<(ItemMetadata, Vec<u8>)> {
        self.lock()
            .files
            .get(id)
            .map(|f| (f.metadata.clone(), f.data.clone()))
    }

    pub fn file_by_name(&self, name: &str) -> Option<(ItemMetadata, Vec<u8>)> {
        self.lock()
            .files
            .values()
            .find(|f| f.metadata.name == name)
            .map(|f| (f.metadata.clone(), f.data.clone()))
    }

    /// Bytes held for an unfinished upload.
    pub fn upload_progress(&self, upload_id: &str) -> Option<u64> {
        self.lock()
            .uploads
            .get(upload_id)
            .map(|u| u.data.len() as u64)
    }

    /// Forgets every unfinished upload, as the remote does after a week.
    pub fn expire_uploads(&self) {
        self.lock().uploads.retain(|_, u| u.file_id.is_some());
    }

    /// Refuses the next `count` requests with a connection error.
    pub fn refuse_next(&self, count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.faults.push_back(Fault::Refuse);
        }
    }

    /// Applies the next request but reports a connection error.
    pub fn drop_next_response(&self) {
        self.lock().faults.push_back(Fault::DropResponse);
    }

    /// Makes every `X-Range-MD5` header wrong.
    pub fn corrupt_range_digest(&self, corrupt: bool) {
        self.lock().corrupt_range_digest = corrupt;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    pub fn upload_chunk_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.is_upload_chunk())
            .count()
    }

    pub fn ranged_get_count(&self) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.is_ranged_get())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.lock();
        state.requests.push(RecordedRequest {
            method: req.method,
            url: req.url.clone(),
            content_range: req.headers.get(header::CONTENT_RANGE).map(str::to_string),
            range: req.headers.get(header::RANGE).map(str::to_string),
            body_len: req.body_len(),
        });

        let fault = state.faults.pop_front();
        if let Some(Fault::Refuse) = fault {
            return Err(TransportError::Connection("connection refused".into()));
        }

        let resp = state.route(&req);
        match fault {
            Some(Fault::DropResponse) => {
                Err(TransportError::Connection("connection reset".into()))
            }
            _ => Ok(resp),
        }
    }
}

impl ChunkedTransport for MockRemote {
    fn request(&self, request: HttpRequest) -> TransportFuture<'_> {
        let result = self.handle(request);
        Box::pin(async move { result })
    }
}

impl MockState {
    fn allocate(&mut self, prefix: &str) -> String {
        let id = format!("{prefix}-{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn route(&mut self, req: &HttpRequest) -> HttpResponse {
        let handle = UploadHandle::new(req.url.clone());
        match (req.method, handle.upload_id()) {
            (Method::Post, None) if req.url.contains("uploadType=resumable") => {
                self.initiate(req)
            }
            (Method::Post, None) if file_id(&req.url).is_none() => self.create_empty(req),
            (Method::Put, Some(upload_id)) => self.upload(&upload_id, req),
            (Method::Get, _) => match file_id(&req.url) {
                Some(id) if req.url.contains("alt=media") => self.media(&id, req),
                Some(id) => self.metadata(&id),
                None => not_found(),
            },
            _ => HttpResponse::new(400).with_body(b"unsupported request".to_vec()),
        }
    }

    fn initiate(&mut self, req: &HttpRequest) -> HttpResponse {
        let metadata: UploadMetadata =
            match serde_json::from_slice(req.body.as_deref().unwrap_or_default()) {
                Ok(m) => m,
                Err(e) => return HttpResponse::new(400).with_body(e.to_string().into_bytes()),
            };
        let upload_id = self.allocate("up");
        let location = UploadHandle::from_upload_id(MOCK_UPLOAD_BASE, &upload_id);
        self.uploads.insert(
            upload_id,
            PendingUpload {
                metadata,
                data: Vec::new(),
                file_id: None,
            },
        );
        HttpResponse::new(status::OK).with_header(header::LOCATION, location.uri())
    }

    fn create_empty(&mut self, req: &HttpRequest) -> HttpResponse {
        let metadata: UploadMetadata =
            match serde_json::from_slice(req.body.as_deref().unwrap_or_default()) {
                Ok(m) => m,
                Err(e) => return HttpResponse::new(400).with_body(e.to_string().into_bytes()),
            };
        let id = self.allocate("file");
        let item = file_metadata(&id, &metadata.name, metadata.parents, &[]);
        self.files.insert(
            id.clone(),
            StoredFile {
                metadata: item,
                data: Vec::new(),
            },
        );
        self.item_response(&id, status::OK)
    }

    fn upload(&mut self, upload_id: &str, req: &HttpRequest) -> HttpResponse {
        let granularity = self.granularity;
        let corrupt = self.corrupt_range_digest;

        let Some(range) = req
            .headers
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.parse::<ContentRange>().ok())
        else {
            return HttpResponse::new(400).with_body(b"missing Content-Range".to_vec());
        };
        let Some(upload) = self.uploads.get_mut(upload_id) else {
            return not_found();
        };
        if let Some(id) = upload.file_id.clone() {
            return self.item_response(&id, status::OK);
        }

        let body = req.body.as_deref().unwrap_or_default();
        let held = upload.data.len() as u64;

        match range {
            ContentRange::Unsatisfied { total } => {
                if !body.is_empty() {
                    return HttpResponse::new(400).with_body(b"body without range".to_vec());
                }
                if total == 0 && held == 0 {
                    return self.finalize(upload_id);
                }
                resume_incomplete(&upload.data, false, corrupt)
            }
            ContentRange::Bytes { first, last, total } => {
                let len = last - first + 1;
                if first != held {
                    return HttpResponse::new(400)
                        .with_body(format!("expected offset {held}, got {first}").into_bytes());
                }
                if body.len() as u64 != len || last >= total {
                    return HttpResponse::new(400).with_body(b"malformed chunk".to_vec());
                }
                let is_last = last + 1 == total;
                if !is_last && len % granularity != 0 {
                    return HttpResponse::new(400).with_body(
                        format!("chunk of {len} bytes is not a multiple of {granularity}")
                            .into_bytes(),
                    );
                }
                upload.data.extend_from_slice(body);
                if is_last {
                    self.finalize(upload_id)
                } else {
                    resume_incomplete(&upload.data, true, corrupt)
                }
            }
        }
    }

    fn finalize(&mut self, upload_id: &str) -> HttpResponse {
        let id = self.allocate("file");
        let Some(upload) = self.uploads.get_mut(upload_id) else {
            return not_found();
        };
        upload.file_id = Some(id.clone());
        let data = std::mem::take(&mut upload.data);
        let metadata = file_metadata(
            &id,
            &upload.metadata.name,
            upload.metadata.parents.clone(),
            &data,
        );
        self.files.insert(id.clone(), StoredFile { metadata, data });
        self.item_response(&id, status::OK)
    }

    fn metadata(&self, id: &str) -> HttpResponse {
        self.item_response(id, status::OK)
    }

    fn media(&self, id: &str, req: &HttpRequest) -> HttpResponse {
        let Some(file) = self.files.get(id) else {
            return not_found();
        };
        let size = file.data.len() as u64;

        let Some(value) = req.headers.get(header::RANGE) else {
            return HttpResponse::new(status::OK)
                .with_header(header::CONTENT_LENGTH, size.to_string())
                .with_body(file.data.clone());
        };
        let Ok(range) = value.parse::<ByteRange>() else {
            return HttpResponse::new(400).with_body(b"bad Range".to_vec());
        };
        if range.first >= size {
            return HttpResponse::new(416)
                .with_header(header::CONTENT_RANGE, format!("bytes */{size}"));
        }
        let last = range.last.min(size - 1);
        let body = file.data[range.first as usize..=last as usize].to_vec();
        HttpResponse::new(status::PARTIAL_CONTENT)
            .with_header(
                header::CONTENT_RANGE,
                format!("bytes {}-{last}/{size}", range.first),
            )
            .with_header(header::CONTENT_LENGTH, body.len().to_string())
            .with_body(body)
    }

    fn item_response(&self, id: &str, code: u16) -> HttpResponse {
        match self.files.get(id) {
            Some(file) => match serde_json::to_vec(&file.metadata) {
                Ok(body) => HttpResponse::new(code)
                    .with_header(header::CONTENT_TYPE, "application/json")
                    .with_body(body),
                Err(e) => HttpResponse::new(500).with_body(e.to_string().into_bytes()),
            },
            None => not_found(),
        }
    }
}

fn file_metadata(id: &str, name: &str, parents: Vec<String>, data: &[u8]) -> ItemMetadata {
    ItemMetadata {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: "application/octet-stream".to_string(),
        parents,
        size: Some(data.len() as u64),
        md5_checksum: Some(checksum_bytes(ChecksumAlgorithm::Md5, data)),
    }
}

fn resume_incomplete(held: &[u8], with_digest: bool, corrupt: bool) -> HttpResponse {
    let mut resp = HttpResponse::new(status::RESUME_INCOMPLETE);
    if !held.is_empty() {
        resp = resp.with_header(header::RANGE, format!("bytes=0-{}", held.len() - 1));
        if with_digest {
            let digest = if corrupt {
                "00000000000000000000000000000000".to_string()
            } else {
                checksum_bytes(ChecksumAlgorithm::Md5, held)
            };
            resp = resp.with_header(header::X_RANGE_MD5, digest);
        }
    }
    resp
}

fn not_found() -> HttpResponse {
    HttpResponse::new(status::NOT_FOUND).with_body(b"not found".to_vec())
}

/// Extracts `{id}` from `.../files/{id}?...`.
fn file_id(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/files/")?;
    let id = rest.split(['?', '/']).next()?;
    (!id.is_empty()).then(|| id.to_string())
}
