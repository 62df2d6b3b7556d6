//! Progress reporting and Ctrl-C handling for transfers.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use driveport_client::{ResumeRecord, ResumeStore};
use driveport_transfer::{ProgressObserver, SpeedCalculator, TransferProgress};

/// Returns a flag that flips to `true` on the first Ctrl-C.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let setter = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current chunk");
            setter.store(true, Ordering::SeqCst);
        }
    });
    flag
}

/// Logs throughput after each chunk and stops on interrupt.
///
/// For uploads it also rewrites the resume file after every confirmed chunk,
/// so a crash loses at most the chunk in flight.
pub struct CliProgress {
    speed: SpeedCalculator,
    interrupted: Arc<AtomicBool>,
    checkpoint: Option<(ResumeStore, ResumeRecord)>,
}

impl CliProgress {
    pub fn new(interrupted: Arc<AtomicBool>) -> Self {
        Self {
            speed: SpeedCalculator::default(),
            interrupted,
            checkpoint: None,
        }
    }

    pub fn with_checkpoint(mut self, store: ResumeStore, record: ResumeRecord) -> Self {
        self.checkpoint = Some((store, record));
        self
    }

    fn save_checkpoint(&mut self, progress: &TransferProgress) {
        let Some((store, record)) = self.checkpoint.as_mut() else {
            return;
        };
        let Some(state) = progress.resume_state() else {
            return;
        };
        record.state = state;
        if let Err(e) = store.save(record) {
            tracing::warn!(error = %e, path = %store.path().display(), "failed to save resume point");
        }
    }
}

impl ProgressObserver for CliProgress {
    fn on_progress(&mut self, progress: &TransferProgress) -> ControlFlow<()> {
        self.speed.record(progress.bytes_transferred);

        let remaining = progress.total_size - progress.bytes_transferred.min(progress.total_size);
        let eta = self.speed.eta(remaining).map(|d| d.as_secs());
        tracing::info!(
            transferred = progress.bytes_transferred,
            total = progress.total_size,
            percent = format_args!("{:.1}", progress.fraction() * 100.0),
            rate = %format_bytes(self.speed.bytes_per_second() as u64),
            eta_secs = ?eta,
            "progress"
        );

        if !progress.is_complete() {
            self.save_checkpoint(progress);
        }

        if self.interrupted.load(Ordering::SeqCst) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

/// Human-readable byte count per second.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use driveport_protocol::{UploadHandle, UploadMetadata};
    use driveport_transfer::ResumeState;
    use tempfile::TempDir;

    #[test]
    fn formats_rates() {
        assert_eq!(format_bytes(512), "512.0 B/s");
        assert_eq!(format_bytes(1536), "1.5 KiB/s");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10.0 MiB/s");
    }

    #[test]
    fn stops_once_interrupted() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut observer = CliProgress::new(flag.clone());
        let p = TransferProgress::new(10, 100, None);
        assert!(observer.on_progress(&p).is_continue());
        flag.store(true, Ordering::SeqCst);
        assert!(observer.on_progress(&p).is_break());
    }

    #[test]
    fn checkpoints_upload_progress() {
        let dir = TempDir::new().unwrap();
        let store = ResumeStore::new(dir.path().join("resume.json"));
        let handle = UploadHandle::new("https://example.test/u?upload_id=1");
        let record = ResumeRecord {
            source: dir.path().join("src.bin"),
            destination: UploadMetadata::new("src.bin", "root"),
            state: ResumeState {
                handle: handle.clone(),
                total_size: 100,
                bytes_transferred: 0,
            },
        };

        let mut observer = CliProgress::new(Arc::new(AtomicBool::new(false)))
            .with_checkpoint(store.clone(), record);
        let _ = observer.on_progress(&TransferProgress::new(40, 100, Some(handle)));

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.state.bytes_transferred, 40);
    }
}
