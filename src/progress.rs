//! Progress reporting.
//!
//! This module provides [`ProgressCallback`] for monitoring a job's stages
//! and [`ProgressInfo`] for detailed progress snapshots. Jobs are not
//! cancellable; a callback observes but never halts the pipeline.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use reelmaker::{ProgressCallback, ProgressInfo, VideoMakerOptions};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.1}% complete", info.operation);
//!         }
//!     }
//! }
//!
//! let options = VideoMakerOptions::new()
//!     .with_progress(Arc::new(PrintProgress))
//!     .with_batch_size(30);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

/// The pipeline stage currently in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Encoding still images into the video track. Counted in frames.
    VideoEncoding,
    /// Re-encoding the audio source to AAC. Counted in encoded samples.
    AudioTranscoding,
    /// Looping or trimming the audio to the target duration. Counted in
    /// emitted samples.
    AudioLooping,
    /// Copying video and audio samples into the final container.
    Merging,
}

/// A snapshot of a stage's progress.
///
/// Delivered to [`ProgressCallback::on_progress`] at a cadence controlled
/// by [`VideoMakerOptions::with_batch_size`](crate::VideoMakerOptions::with_batch_size).
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// What kind of work is being performed.
    pub operation: OperationType,
    /// How many items (frames / samples) have been processed so far.
    pub current: u64,
    /// Total items expected, if known ahead of time.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if `total` is known.
    pub percentage: Option<f32>,
    /// Wall-clock time elapsed since the stage started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Presentation timestamp of the item just processed, in microseconds.
    pub presentation_time_us: Option<i64>,
}

/// Trait for receiving progress updates while a job runs.
///
/// Implementations must be [`Send`] and [`Sync`] so one callback can be
/// shared by jobs running on different threads.
///
/// Progress callbacks are **infallible**: they observe but cannot halt
/// the job.
pub trait ProgressCallback: Send + Sync {
    /// Called at regular intervals during a stage.
    fn on_progress(&self, info: &ProgressInfo);
}

/// A no-op implementation that discards all progress notifications.
///
/// This is the default when no callback is configured.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Internal helper that tracks progress timing and emits callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    items_since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            items_since_last_report: 0,
        }
    }

    /// Record one completed item and fire the callback if the batch
    /// threshold is reached.
    pub(crate) fn advance(&mut self, presentation_time_us: Option<i64>) {
        self.current += 1;
        self.items_since_last_report += 1;

        if self.items_since_last_report >= self.batch_size {
            self.report(presentation_time_us);
            self.items_since_last_report = 0;
        }
    }

    /// Unconditionally emit a final progress report.
    pub(crate) fn finish(&mut self) {
        self.report(None);
    }

    fn report(&self, presentation_time_us: Option<i64>) {
        let elapsed = self.start_time.elapsed();

        let percentage = self
            .total
            .filter(|&t| t > 0)
            .map(|t| (self.current as f32 / t as f32) * 100.0);

        let estimated_remaining = if self.current > 0 {
            self.total.map(|t| {
                let remaining = t.saturating_sub(self.current);
                let per_item = elapsed.div_f64(self.current as f64);
                per_item.mul_f64(remaining as f64)
            })
        } else {
            None
        };

        let info = ProgressInfo {
            operation: self.operation,
            current: self.current,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            presentation_time_us,
        };

        self.callback.on_progress(&info);
    }
}
