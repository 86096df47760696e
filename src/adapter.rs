//! Audio duration adaptation.
//!
//! [`AudioDurationAdapter`] makes an audio elementary stream last exactly as
//! long as the video: shorter sources are looped sample-accurately, longer
//! ones trimmed. The result is an in-memory [`AdaptedAudio`] track that the
//! merger reads like any other container track.

use std::slice;
use std::sync::Arc;

use crate::codec::{TrackReader, find_track};
use crate::error::ReelError;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::sample::{MediaTrack, SampleBuffer, TrackKind};

/// How the audio duration was adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioAdjustment {
    /// The source was repeated `loops` times (the last repetition cut short).
    Looped { loops: u64 },
    /// Samples past the target were dropped.
    Trimmed,
    /// The source already matched the target.
    PassThrough,
}

/// The adaptation chosen for a source of `A` µs and a target of `T` µs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPlan {
    /// `A < T`: repeat the source `ceil(T / A)` times.
    Loop { loops: u64 },
    /// `A > T`: keep samples up to `limit_us = min(video duration, T)`.
    Trim { limit_us: i64 },
    /// `A == T`.
    PassThrough,
}

impl DurationPlan {
    /// Pick the plan for `source_us` of audio and a `target_us` target.
    ///
    /// `video_us`, when known, further bounds the trim limit.
    pub fn decide(source_us: i64, target_us: i64, video_us: Option<i64>) -> Self {
        if source_us < target_us {
            let source = source_us.max(1) as u64;
            let loops = (target_us as u64).div_ceil(source);
            DurationPlan::Loop { loops }
        } else if source_us > target_us {
            let limit_us = video_us.map_or(target_us, |video| video.min(target_us));
            DurationPlan::Trim { limit_us }
        } else {
            DurationPlan::PassThrough
        }
    }

    pub fn adjustment(&self) -> AudioAdjustment {
        match *self {
            DurationPlan::Loop { loops } => AudioAdjustment::Looped { loops },
            DurationPlan::Trim { .. } => AudioAdjustment::Trimmed,
            DurationPlan::PassThrough => AudioAdjustment::PassThrough,
        }
    }
}

/// Loops or trims an audio track to a target duration.
#[derive(Clone)]
pub struct AudioDurationAdapter {
    target_us: i64,
    video_duration_us: Option<i64>,
    progress: Option<(Arc<dyn ProgressCallback>, u64)>,
}

impl AudioDurationAdapter {
    /// Adapt to `target_us` microseconds.
    pub fn new(target_us: i64) -> Self {
        Self {
            target_us,
            video_duration_us: None,
            progress: None,
        }
    }

    /// Bound trimming by the video track's duration as well.
    #[must_use]
    pub fn with_video_duration(mut self, video_duration_us: i64) -> Self {
        self.video_duration_us = Some(video_duration_us);
        self
    }

    #[must_use]
    pub(crate) fn with_progress(mut self, callback: Arc<dyn ProgressCallback>, batch_size: u64) -> Self {
        self.progress = Some((callback, batch_size));
        self
    }

    pub fn target_us(&self) -> i64 {
        self.target_us
    }

    /// Read the first audio track of `reader` and adapt it.
    ///
    /// `source_duration_us` is the probed duration `A` of that track.
    ///
    /// # Errors
    ///
    /// - [`ReelError::NoAudioTrack`] if `reader` has no audio track.
    /// - [`ReelError::InvalidInput`] if `source_duration_us` is not positive.
    /// - Any error raised by the reader.
    pub fn adapt(
        &self,
        reader: &mut dyn TrackReader,
        source_duration_us: i64,
    ) -> Result<AdaptedAudio, ReelError> {
        if source_duration_us <= 0 {
            return Err(ReelError::InvalidInput(format!(
                "audio duration must be positive, got {source_duration_us} us"
            )));
        }

        let (index, track) = find_track(reader, TrackKind::Audio).ok_or(ReelError::NoAudioTrack)?;
        reader.select_track(index)?;

        let plan = DurationPlan::decide(source_duration_us, self.target_us, self.video_duration_us);
        log::info!(
            "Adapting {source_duration_us} us of {} audio to {} us: {plan:?}",
            track.mime,
            self.target_us
        );

        let mut tracker = self.progress.as_ref().map(|(callback, batch_size)| {
            ProgressTracker::new(callback.clone(), OperationType::AudioLooping, None, *batch_size)
        });

        let (samples, duration_us) = match plan {
            DurationPlan::Loop { loops } => {
                self.loop_samples(reader, source_duration_us, loops, tracker.as_mut())?
            }
            DurationPlan::Trim { limit_us } => {
                let samples = collect_until(reader, limit_us, tracker.as_mut())?;
                (samples, limit_us.min(source_duration_us))
            }
            DurationPlan::PassThrough => {
                let samples = collect_until(reader, i64::MAX, tracker.as_mut())?;
                (samples, source_duration_us)
            }
        };

        if let Some(tracker) = tracker.as_mut() {
            tracker.finish();
        }
        log::debug!("Adapted audio holds {} samples", samples.len());

        Ok(AdaptedAudio::new(
            track.with_duration_us(duration_us),
            samples,
            plan.adjustment(),
        ))
    }

    fn loop_samples(
        &self,
        reader: &mut dyn TrackReader,
        source_duration_us: i64,
        loops: u64,
        mut tracker: Option<&mut ProgressTracker>,
    ) -> Result<(Vec<SampleBuffer>, i64), ReelError> {
        let mut samples = Vec::new();

        'loops: for loop_index in 0..loops {
            let offset_us = loop_index as i64 * source_duration_us;
            reader.seek_to_start()?;
            log::debug!("Audio loop {} of {loops} at offset {offset_us} us", loop_index + 1);

            while let Some(sample) = reader.read_sample()? {
                if sample.presentation_time_us >= source_duration_us {
                    log::trace!(
                        "Skipping audio sample at {} us past the declared duration",
                        sample.presentation_time_us
                    );
                    continue;
                }
                let adjusted_us = offset_us + sample.presentation_time_us;
                if adjusted_us >= self.target_us {
                    break 'loops;
                }
                samples.push(sample.retimed(adjusted_us));
                if let Some(tracker) = tracker.as_deref_mut() {
                    tracker.advance(Some(adjusted_us));
                }
            }
        }

        Ok((samples, self.target_us))
    }
}

/// Read samples in order until one is past `limit_us`.
fn collect_until(
    reader: &mut dyn TrackReader,
    limit_us: i64,
    mut tracker: Option<&mut ProgressTracker>,
) -> Result<Vec<SampleBuffer>, ReelError> {
    reader.seek_to_start()?;
    let mut samples = Vec::new();
    while let Some(sample) = reader.read_sample()? {
        if sample.presentation_time_us > limit_us {
            break;
        }
        if let Some(tracker) = tracker.as_deref_mut() {
            tracker.advance(Some(sample.presentation_time_us));
        }
        samples.push(sample);
    }
    Ok(samples)
}

/// An audio track held in memory after duration adaptation.
///
/// Implements [`TrackReader`] with a single track at index `0`.
#[derive(Debug, Clone)]
pub struct AdaptedAudio {
    track: MediaTrack,
    samples: Vec<SampleBuffer>,
    adjustment: AudioAdjustment,
    cursor: usize,
}

impl AdaptedAudio {
    /// Wrap `samples` of `track`.
    pub fn new(track: MediaTrack, samples: Vec<SampleBuffer>, adjustment: AudioAdjustment) -> Self {
        Self {
            track,
            samples,
            adjustment,
            cursor: 0,
        }
    }

    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    pub fn samples(&self) -> &[SampleBuffer] {
        &self.samples
    }

    pub fn adjustment(&self) -> AudioAdjustment {
        self.adjustment
    }

    /// Duration of the adapted track in microseconds.
    pub fn duration_us(&self) -> i64 {
        self.track.duration_us.unwrap_or(0)
    }
}

impl TrackReader for AdaptedAudio {
    fn tracks(&self) -> &[MediaTrack] {
        slice::from_ref(&self.track)
    }

    fn select_track(&mut self, index: usize) -> Result<(), ReelError> {
        if index != 0 {
            return Err(ReelError::InvalidInput(format!(
                "adapted audio has a single track, index {index} requested"
            )));
        }
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<(), ReelError> {
        self.cursor = 0;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<SampleBuffer>, ReelError> {
        let sample = self.samples.get(self.cursor).cloned();
        if sample.is_some() {
            self.cursor += 1;
        }
        Ok(sample)
    }
}
