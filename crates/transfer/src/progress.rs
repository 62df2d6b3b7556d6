use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use driveport_protocol::UploadHandle;
use serde::{Deserialize, Serialize};

/// Snapshot handed to the observer after every confirmed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    /// Bytes confirmed by the other side.
    pub bytes_transferred: u64,
    /// Size of the whole object.
    pub total_size: u64,
    /// Upload handle to persist for a later resume. `None` for downloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<UploadHandle>,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_size: u64, handle: Option<UploadHandle>) -> Self {
        Self {
            bytes_transferred,
            total_size,
            handle,
        }
    }

    /// Completed fraction in `[0.0, 1.0]`. An empty object counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total_size == 0 {
            return 1.0;
        }
        self.bytes_transferred as f64 / self.total_size as f64
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.total_size
    }

    /// State a later process needs to resume this upload.
    pub fn resume_state(&self) -> Option<ResumeState> {
        self.handle.as_ref().map(|handle| ResumeState {
            handle: handle.clone(),
            total_size: self.total_size,
            bytes_transferred: self.bytes_transferred,
        })
    }
}

/// Persistable resume point of an upload.
///
/// `bytes_transferred` is informational: a resumed session always asks the
/// remote how much it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    pub handle: UploadHandle,
    pub total_size: u64,
    pub bytes_transferred: u64,
}

/// Receives progress after each successful chunk, never after a failed one.
///
/// Returning `ControlFlow::Break(())` stops the transfer at this chunk
/// boundary. The chunk that was just confirmed stays confirmed.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, progress: &TransferProgress) -> ControlFlow<()>;
}

impl<F> ProgressObserver for F
where
    F: FnMut(&TransferProgress) -> ControlFlow<()> + Send,
{
    fn on_progress(&mut self, progress: &TransferProgress) -> ControlFlow<()> {
        self(progress)
    }
}

/// Observer that never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: &TransferProgress) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

/// Throughput over a sliding time window of cumulative byte counts.
#[derive(Debug, Clone)]
pub struct SpeedCalculator {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Records that `transferred` bytes are done as of now.
    pub fn record(&mut self, transferred: u64) {
        self.record_at(Instant::now(), transferred);
    }

    fn record_at(&mut self, at: Instant, transferred: u64) {
        self.samples.push_back((at, transferred));
        // Keep one sample older than the window as its starting point.
        while self.samples.len() > 2
            && self
                .samples
                .get(1)
                .is_some_and(|(t, _)| at.duration_since(*t) > self.window)
        {
            self.samples.pop_front();
        }
    }

    /// Bytes per second across the window; 0.0 until two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some((t0, b0)), Some((t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(*t0);
        if elapsed.is_zero() {
            return 0.0;
        }
        b1.saturating_sub(*b0) as f64 / elapsed.as_secs_f64()
    }

    /// Time to move `remaining` bytes at the current rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        (speed > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / speed))
    }
}
