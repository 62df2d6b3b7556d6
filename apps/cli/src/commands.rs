use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, bail};
use driveport_client::{ClientError, DriveClient, ResumeRecord, ResumeStore};
use driveport_protocol::UploadMetadata;
use driveport_transfer::{TransferError, UploadSession};
use tracing::{info, warn};

use crate::progress::CliProgress;

pub async fn upload(
    drive: &DriveClient,
    local: &Path,
    parent: &str,
    name: Option<String>,
    resume_file: Option<PathBuf>,
    interrupted: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let name = match name {
        Some(name) => name,
        None => local
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("{} has no usable file name", local.display()))?,
    };
    let target = UploadMetadata::new(name, parent);
    let source = std::fs::canonicalize(local)
        .with_context(|| format!("reading {}", local.display()))?;

    if std::fs::metadata(&source)?.len() == 0 {
        let item = drive.upload_empty(&target).await?;
        println!("{}", item.id());
        return Ok(());
    }

    let store = ResumeStore::new(resume_file.unwrap_or_else(|| default_resume_path(&source)));
    let resume = match store.load() {
        Ok(Some(record)) if record.matches(&source, &target) => {
            info!(
                bytes = record.state.bytes_transferred,
                total = record.state.total_size,
                "resuming previous upload"
            );
            Some(record.state)
        }
        Ok(Some(_)) => {
            warn!(path = %store.path().display(), "resume file belongs to another upload, ignoring it");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "unreadable resume file, starting over");
            None
        }
    };
    let resuming = resume.is_some();

    let mut session = match drive.open_upload(&source, &target, resume).await {
        Ok(session) => session,
        Err(ClientError::Transfer(TransferError::SizeMismatch { .. })) if resuming => {
            store.clear()?;
            bail!("{} changed since the upload started; run again to start over", local.display());
        }
        Err(e) => return Err(e.into()),
    };

    let mut observer = CliProgress::new(interrupted);
    if let Some(state) = session.resume_state() {
        let record = ResumeRecord {
            source: source.clone(),
            destination: target.clone(),
            state,
        };
        store.save(&record)?;
        observer = observer.with_checkpoint(store.clone(), record);
    }

    match session.run(&mut observer).await {
        Ok(item) => {
            store.clear()?;
            info!(id = %item.id, name = %item.name, "upload complete");
            println!("{}", item.id);
            Ok(())
        }
        Err(e) => {
            settle_resume_file(&store, &session, &e, resuming)?;
            Err(e.into())
        }
    }
}

/// Keeps the resume file when the handle can still be used, drops it otherwise.
fn settle_resume_file(
    store: &ResumeStore,
    session: &UploadSession,
    err: &TransferError,
    resuming: bool,
) -> anyhow::Result<()> {
    if let TransferError::Aborted { progress } = err {
        info!(
            bytes = progress.bytes_transferred,
            total = progress.total_size,
            path = %store.path().display(),
            "upload interrupted; run the same command to resume"
        );
        return Ok(());
    }

    let stale = resuming
        && matches!(err, TransferError::Transport(t) if t.status() == Some(404));
    if err.invalidates_handle() || stale {
        warn!("upload handle is no longer usable; the next run starts over");
        store.clear()?;
    } else if let Some(state) = session.resume_state()
        && let Ok(Some(mut record)) = store.load()
    {
        record.state = state;
        store.save(&record)?;
    }
    Ok(())
}

pub async fn download(
    drive: &DriveClient,
    file_id: &str,
    local: &Path,
    interrupted: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let mut session = drive.open_download(file_id, local).await?;
    if session.current_progress() > 0 {
        info!(
            bytes = session.current_progress(),
            total = session.total_size(),
            "resuming into existing file"
        );
    }

    let mut observer = CliProgress::new(interrupted);
    match session.run(&mut observer).await {
        Ok(done) => {
            if !done.verified {
                warn!("remote reported no checksum; content not verified");
            }
            info!(path = %done.path.display(), size = done.size, "download complete");
            Ok(())
        }
        Err(TransferError::Aborted { progress }) => {
            info!(
                bytes = progress.bytes_transferred,
                total = progress.total_size,
                "download interrupted; run the same command to resume"
            );
            Ok(())
        }
        Err(e) if e.invalidates_handle() => {
            warn!(path = %local.display(), "discarding corrupt download");
            std::fs::remove_file(local)
                .with_context(|| format!("removing {}", local.display()))?;
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn stat(drive: &DriveClient, id: &str) -> anyhow::Result<()> {
    let item = drive.item(id).await?;
    let kind = if item.is_folder() { "folder" } else { "file" };
    info!(id, kind, "item resolved");
    println!("{}", serde_json::to_string_pretty(item.metadata())?);
    Ok(())
}

fn default_resume_path(source: &Path) -> PathBuf {
    let mut name = source.file_name().unwrap_or_default().to_os_string();
    name.push(".driveport-resume");
    source.with_file_name(name)
}
