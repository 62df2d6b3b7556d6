//! The Drive facade.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use driveport_protocol::constants::{self, DEFAULT_ITEM_FIELDS, DOWNLOAD_FIELDS, status};
use driveport_protocol::{DriveItem, HttpRequest, ItemMetadata, UploadMetadata};
use driveport_transfer::{
    ChunkedTransport, DownloadSession, DownloadedFile, ProgressObserver, RemoteObject,
    ResumeState, TransportError, UploadSession,
};
use tracing::{debug, info};

use crate::config::DriveConfig;
use crate::error::ClientError;
use crate::transport::ReqwestTransport;

/// Entry point for item lookup and transfers.
pub struct DriveClient {
    transport: Arc<dyn ChunkedTransport>,
    config: DriveConfig,
}

impl DriveClient {
    /// Creates a client that talks HTTPS with `access_token`.
    pub fn new(config: DriveConfig, access_token: &str) -> Result<Self, ClientError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let transport = ReqwestTransport::new(access_token, timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a client over an arbitrary transport.
    pub fn with_transport(config: DriveConfig, transport: Arc<dyn ChunkedTransport>) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Resolves an item, classifying it as a folder or a file.
    pub async fn item(&self, id: &str) -> Result<DriveItem, ClientError> {
        Ok(self.metadata(id, DEFAULT_ITEM_FIELDS).await?.into())
    }

    /// Size and checksum of a file, as needed to download it.
    pub async fn file_metadata(&self, id: &str) -> Result<RemoteObject, ClientError> {
        let item = self.metadata(id, DOWNLOAD_FIELDS).await?;
        if item.is_folder() {
            return Err(ClientError::NotAFile { id: item.id });
        }
        Ok(RemoteObject::from_metadata(&item)?)
    }

    /// Opens an upload session. With `resume`, the persisted handle is
    /// adopted instead of initiating a new upload.
    pub async fn open_upload(
        &self,
        local: &Path,
        target: &UploadMetadata,
        resume: Option<ResumeState>,
    ) -> Result<UploadSession, ClientError> {
        let options = self.config.upload_options();
        let session = match resume {
            Some(state) => {
                debug!(handle = %state.handle, "resuming upload");
                UploadSession::resume_from(self.transport.clone(), local, state, options).await?
            }
            None => {
                let url = constants::resumable_initiate_url(&self.config.upload_base);
                UploadSession::initiate(self.transport.clone(), local, &url, target, options)
                    .await?
            }
        };
        Ok(session)
    }

    /// Uploads `local` to `target` and returns the created item.
    pub async fn upload(
        &self,
        local: &Path,
        target: &UploadMetadata,
        resume: Option<ResumeState>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DriveItem, ClientError> {
        let mut session = self.open_upload(local, target, resume).await?;
        let item = session.run(observer).await?;
        info!(id = %item.id, name = %item.name, "uploaded");
        Ok(item.into())
    }

    /// Opens a download session writing into `local`.
    pub async fn open_download(
        &self,
        file_id: &str,
        local: &Path,
    ) -> Result<DownloadSession, ClientError> {
        let remote = self.file_metadata(file_id).await?;
        let url = constants::media_url(&self.config.api_base, file_id);
        Ok(DownloadSession::open(
            self.transport.clone(),
            url,
            remote,
            local,
            self.config.download_options(),
        )
        .await?)
    }

    /// Downloads a file into `local`, resuming from whatever `local` holds.
    pub async fn download(
        &self,
        file_id: &str,
        local: &Path,
        observer: &mut dyn ProgressObserver,
    ) -> Result<DownloadedFile, ClientError> {
        let mut session = self.open_download(file_id, local).await?;
        let done = session.run(observer).await?;
        info!(id = %file_id, path = %local.display(), "downloaded");
        Ok(done)
    }

    /// Creates a zero-byte file without a resumable session.
    pub async fn upload_empty(&self, target: &UploadMetadata) -> Result<DriveItem, ClientError> {
        let url = url::Url::parse_with_params(
            &format!("{}/files", self.config.api_base.trim_end_matches('/')),
            &[("fields", DEFAULT_ITEM_FIELDS)],
        )?;
        let req = HttpRequest::post(url.as_str()).json(target)?;
        let resp = self.transport.request(req).await?;
        if resp.status != status::OK {
            return Err(TransportError::unexpected("empty file creation", &resp).into());
        }
        let item: ItemMetadata = resp.json()?;
        info!(id = %item.id, name = %item.name, "empty file created");
        Ok(item.into())
    }

    async fn metadata(&self, id: &str, fields: &str) -> Result<ItemMetadata, ClientError> {
        let url = url::Url::parse_with_params(
            &constants::item_url(&self.config.api_base, id),
            &[("fields", fields)],
        )?;
        let resp = self.transport.request(HttpRequest::get(url.as_str())).await?;
        if resp.status != status::OK {
            return Err(TransportError::unexpected("metadata lookup", &resp).into());
        }
        Ok(resp.json()?)
    }
}
