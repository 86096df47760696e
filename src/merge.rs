//! Muxing the video-only container with the prepared audio.
//!
//! [`ContainerMerger`] follows the writer's two-phase discipline: every track
//! is registered before the writer starts, and the writer starts once. Audio
//! is best-effort. When the audio track cannot be used the output is
//! video-only; when the video track itself is rejected the unmerged video
//! container is byte-copied to the output path.

use std::path::Path;
use std::sync::Arc;

use crate::codec::{ContainerWriter, MediaBackend, TrackReader, find_track};
use crate::error::ReelError;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::sample::TrackKind;

/// What the merger produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Both tracks were written.
    Merged {
        video_samples: u64,
        audio_samples: u64,
    },
    /// The output has no audio track.
    VideoOnly {
        /// Why audio was left out.
        reason: String,
        /// `true` when the video container was byte-copied rather than
        /// re-muxed.
        copied: bool,
    },
}

impl MergeOutcome {
    pub fn has_audio(&self) -> bool {
        matches!(self, MergeOutcome::Merged { .. })
    }
}

/// Muxes one video container and one optional audio track.
pub struct ContainerMerger<'a> {
    backend: &'a dyn MediaBackend,
    progress: Option<(Arc<dyn ProgressCallback>, u64)>,
}

impl<'a> ContainerMerger<'a> {
    pub fn new(backend: &'a dyn MediaBackend) -> Self {
        Self {
            backend,
            progress: None,
        }
    }

    #[must_use]
    pub(crate) fn with_progress(mut self, callback: Arc<dyn ProgressCallback>, batch_size: u64) -> Self {
        self.progress = Some((callback, batch_size));
        self
    }

    /// Write `video` plus the first audio track of `audio` to `output`.
    ///
    /// Audio samples are copied up to `min(last video timestamp, target_us)`
    /// and the first sample past that bound ends the copy.
    ///
    /// # Errors
    ///
    /// - [`ReelError::NoVideoTrack`] if `video` has no video track.
    /// - [`ReelError::ResourceError`] if the video-only fallback copy fails.
    /// - [`ReelError::MergeError`] if writing audio samples fails after the
    ///   audio track was registered.
    /// - Any reader or writer error on the video side.
    pub fn merge(
        &self,
        video: &Path,
        audio: Option<&mut dyn TrackReader>,
        output: &Path,
        target_us: i64,
    ) -> Result<MergeOutcome, ReelError> {
        log::info!(
            "Merging {} into {} (target {target_us} us)",
            video.display(),
            output.display()
        );

        let mut video_reader = self.backend.open_reader(video)?;
        let (video_index, video_track) =
            find_track(video_reader.as_ref(), TrackKind::Video).ok_or(ReelError::NoVideoTrack)?;
        video_reader.select_track(video_index)?;
        let video_end_us = last_presentation_time_us(video_reader.as_mut())?;
        let audio_limit_us = video_end_us.map_or(target_us, |end| end.min(target_us));

        let mut writer = self.backend.create_writer(output)?;

        let video_target = match writer.add_track(&video_track.sanitized()) {
            Ok(index) => index,
            Err(error) => {
                log::warn!("Video track rejected by writer ({error}); copying video-only container");
                if let Err(error) = writer.finish() {
                    log::warn!("Failed to release merge writer: {error}");
                }
                drop(writer);
                copy_video_only(video, output)?;
                return Ok(MergeOutcome::VideoOnly {
                    reason: format!("video track rejected: {error}"),
                    copied: true,
                });
            }
        };

        let (audio_source, dropped) = match audio {
            Some(reader) => match register_audio(reader, writer.as_mut(), audio_limit_us) {
                Ok(index) => (Some((reader, index)), None),
                Err(reason) => {
                    log::warn!("Dropping audio: {reason}");
                    (None, Some(reason))
                }
            },
            None => (None, Some("no audio source".to_string())),
        };

        let result = self.copy_samples(
            writer.as_mut(),
            video_reader.as_mut(),
            video_target,
            audio_source,
            audio_limit_us,
        );
        let finished = writer.finish();

        let (video_samples, audio_samples) = match result {
            Ok(counts) => {
                finished?;
                counts
            }
            Err(error) => {
                if let Err(finish_error) = finished {
                    log::warn!("Failed to release merge writer: {finish_error}");
                }
                return Err(error);
            }
        };

        log::info!("Merged {video_samples} video and {audio_samples} audio samples");
        Ok(match dropped {
            Some(reason) => MergeOutcome::VideoOnly {
                reason,
                copied: false,
            },
            None => MergeOutcome::Merged {
                video_samples,
                audio_samples,
            },
        })
    }

    fn copy_samples(
        &self,
        writer: &mut dyn ContainerWriter,
        video: &mut dyn TrackReader,
        video_target: usize,
        audio: Option<(&mut dyn TrackReader, usize)>,
        audio_limit_us: i64,
    ) -> Result<(u64, u64), ReelError> {
        let mut tracker = self.progress.as_ref().map(|(callback, batch_size)| {
            ProgressTracker::new(callback.clone(), OperationType::Merging, None, *batch_size)
        });

        writer.start()?;

        let mut video_samples = 0;
        while let Some(sample) = video.read_sample()? {
            writer.write_sample(video_target, &sample)?;
            video_samples += 1;
            if let Some(tracker) = tracker.as_mut() {
                tracker.advance(Some(sample.presentation_time_us));
            }
        }

        let mut audio_samples = 0;
        if let Some((audio, audio_target)) = audio {
            while let Some(sample) = audio.read_sample()? {
                if sample.presentation_time_us > audio_limit_us {
                    log::debug!(
                        "Audio copy stopped at {} us (bound {audio_limit_us} us)",
                        sample.presentation_time_us
                    );
                    break;
                }
                writer
                    .write_sample(audio_target, &sample)
                    .map_err(|error| ReelError::MergeError(format!("audio sample rejected: {error}")))?;
                audio_samples += 1;
                if let Some(tracker) = tracker.as_mut() {
                    tracker.advance(Some(sample.presentation_time_us));
                }
            }
        }

        if let Some(tracker) = tracker.as_mut() {
            tracker.finish();
        }
        Ok((video_samples, audio_samples))
    }
}

/// Scan the selected track for its largest timestamp, then rewind.
fn last_presentation_time_us(reader: &mut dyn TrackReader) -> Result<Option<i64>, ReelError> {
    reader.seek_to_start()?;
    let mut last = None;
    while let Some(sample) = reader.read_sample()? {
        last = Some(last.map_or(sample.presentation_time_us, |pts: i64| {
            pts.max(sample.presentation_time_us)
        }));
    }
    reader.seek_to_start()?;
    Ok(last)
}

/// Select and register the audio track, or explain why it cannot be used.
fn register_audio(
    reader: &mut dyn TrackReader,
    writer: &mut dyn ContainerWriter,
    limit_us: i64,
) -> Result<usize, String> {
    let (index, track) =
        find_track(reader, TrackKind::Audio).ok_or_else(|| ReelError::NoAudioTrack.to_string())?;
    reader.select_track(index).map_err(|error| error.to_string())?;
    reader.seek_to_start().map_err(|error| error.to_string())?;

    match reader.read_sample().map_err(|error| error.to_string())? {
        None => return Err("audio track has no samples".to_string()),
        Some(first) if first.presentation_time_us > limit_us => {
            return Err(format!(
                "no audio sample at or before {limit_us} us (first at {} us)",
                first.presentation_time_us
            ));
        }
        Some(_) => reader.seek_to_start().map_err(|error| error.to_string())?,
    }

    writer
        .add_track(&track.sanitized())
        .map_err(|error| ReelError::MergeError(format!("audio track rejected: {error}")).to_string())
}

/// Byte-copy the unmerged video container to `output`.
fn copy_video_only(video: &Path, output: &Path) -> Result<(), ReelError> {
    std::fs::copy(video, output).map_err(|error| ReelError::ResourceError {
        path: output.to_path_buf(),
        reason: format!("cannot copy {}: {error}", video.display()),
    })?;
    log::info!("Copied video-only container to {}", output.display());
    Ok(())
}
