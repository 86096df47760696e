//! Video encode session.
//!
//! [`EncodeSession`] drives a video [`Codec`] and a [`ContainerWriter`]
//! through a cooperative polling loop, feeding planar frames in schedule
//! order and copying compressed samples into the container.
//!
//! ```text
//! Configuring --configure()--> Running --all frames submitted--> Draining
//!                                 |                                 |
//!                                 +------> Failed <-----------------+
//!                                                                   |
//!                                  Finalized <--end-of-stream drained
//! ```

use std::path::Path;
use std::time::Duration;

use crate::codec::{Codec, CodecConfig, ContainerWriter, MediaBackend, OutputEvent, VideoEncoderConfig};
use crate::color::PlanarFrame;
use crate::error::ReelError;
use crate::progress::ProgressTracker;
use crate::sample::{MediaTrack, SampleFlags};
use crate::schedule::FrameSchedule;

/// Lifecycle of an [`EncodeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; the codec has not been configured yet.
    Configuring,
    /// Frames are being submitted and output drained.
    Running,
    /// End of stream submitted; waiting for the codec to flush.
    Draining,
    /// End of stream drained and the container finalized.
    Finalized,
    /// A codec or writer error tore the session down.
    Failed,
}

/// Supplies the planar frame for a source image.
///
/// Called once per input submission with the index of the image the
/// schedule places at the current frame; implementations are expected to
/// cache the most recent frame.
pub trait FrameSource {
    fn frame(&mut self, source_index: usize) -> Result<&PlanarFrame, ReelError>;
}

/// What a finished session produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Frames submitted to the encoder.
    pub frames_submitted: u64,
    /// Compressed samples written to the container.
    pub samples_written: u64,
    /// Timestamp of the last sample written, in microseconds.
    pub last_presentation_time_us: Option<i64>,
    /// The video track as announced by the encoder and registered.
    pub track: MediaTrack,
}

/// A single-use video encode.
pub struct EncodeSession {
    codec: Box<dyn Codec>,
    writer: Box<dyn ContainerWriter>,
    config: VideoEncoderConfig,
    poll_timeout: Duration,
    state: SessionState,
    progress: Option<ProgressTracker>,
}

impl EncodeSession {
    /// Wrap an unconfigured codec and an unstarted writer.
    pub fn new(
        codec: Box<dyn Codec>,
        writer: Box<dyn ContainerWriter>,
        config: VideoEncoderConfig,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            codec,
            writer,
            config,
            poll_timeout,
            state: SessionState::Configuring,
            progress: None,
        }
    }

    /// Create the encoder and the writer for `output` from `backend`.
    ///
    /// # Errors
    ///
    /// [`ReelError::VideoEncodeError`] if either resource cannot be created.
    pub fn open(
        backend: &dyn MediaBackend,
        config: VideoEncoderConfig,
        output: &Path,
        poll_timeout: Duration,
    ) -> Result<Self, ReelError> {
        let codec = backend
            .create_encoder(&config.mime)
            .map_err(ReelError::into_video_encode)?;
        let writer = match backend.create_writer(output) {
            Ok(writer) => writer,
            Err(error) => {
                let mut codec = codec;
                codec.stop();
                return Err(error.into_video_encode());
            }
        };
        Ok(Self::new(codec, writer, config, poll_timeout))
    }

    pub(crate) fn with_progress(mut self, tracker: ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Configure the codec with the session's profile.
    ///
    /// # Errors
    ///
    /// [`ReelError::VideoEncodeError`] if the session is not in
    /// [`SessionState::Configuring`] or the codec rejects the profile; the
    /// session is then [`SessionState::Failed`].
    pub fn configure(&mut self) -> Result<(), ReelError> {
        if self.state != SessionState::Configuring {
            return Err(ReelError::VideoEncodeError(format!(
                "cannot configure a session in state {:?}",
                self.state
            )));
        }

        log::debug!(
            "Configuring {} encoder: {}x{} @ {} fps, {} bps, keyframe every {} s, max input {} bytes",
            self.config.mime,
            self.config.width,
            self.config.height,
            self.config.frame_rate,
            self.config.bit_rate,
            self.config.i_frame_interval,
            self.config.max_input_size,
        );

        let config = CodecConfig::VideoEncoder(self.config.clone());
        match self.codec.configure(&config) {
            Ok(()) => {
                self.state = SessionState::Running;
                Ok(())
            }
            Err(error) => {
                self.fail();
                Err(error.into_video_encode())
            }
        }
    }

    /// Encode every frame of `schedule` and finalize the container.
    ///
    /// # Errors
    ///
    /// [`ReelError::VideoEncodeError`] on any codec, writer, or frame-source
    /// failure, or if the codec violates the buffer-queue protocol (a
    /// second format announcement, a sample before the format, an early end
    /// of stream). The session is then [`SessionState::Failed`] and every
    /// resource has been released.
    pub fn run(
        &mut self,
        schedule: &FrameSchedule,
        frames: &mut dyn FrameSource,
    ) -> Result<EncodeSummary, ReelError> {
        if self.state != SessionState::Running {
            return Err(ReelError::VideoEncodeError(format!(
                "cannot run a session in state {:?}",
                self.state
            )));
        }

        match self.drive(schedule, frames) {
            Ok(summary) => Ok(summary),
            Err(error) => {
                self.fail();
                Err(error.into_video_encode())
            }
        }
    }

    fn drive(
        &mut self,
        schedule: &FrameSchedule,
        frames: &mut dyn FrameSource,
    ) -> Result<EncodeSummary, ReelError> {
        if schedule.frame_rate() != self.config.frame_rate {
            return Err(ReelError::InvalidInput(format!(
                "schedule frame rate {} does not match encoder frame rate {}",
                schedule.frame_rate(),
                self.config.frame_rate
            )));
        }

        let total_frames = schedule.total_frames();
        let frame_len = PlanarFrame::byte_len(self.config.width, self.config.height);

        let mut next_frame: u64 = 0;
        let mut frame_offset: usize = 0;
        let mut track: Option<(usize, MediaTrack)> = None;
        let mut samples_written: u64 = 0;
        let mut last_presentation_time_us = None;

        log::info!(
            "Encoding {total_frames} frames at {}x{}",
            self.config.width,
            self.config.height
        );

        loop {
            let slot = if self.state == SessionState::Running {
                self.codec.acquire_input(self.poll_timeout)?
            } else {
                None
            };
            if let Some(slot) = slot {
                if next_frame < total_frames {
                    if slot.capacity == 0 {
                        return Err(ReelError::VideoEncodeError(
                            "encoder offered a zero-capacity input slot".to_string(),
                        ));
                    }
                    let source_index = schedule.source_for_frame(next_frame).ok_or_else(|| {
                        ReelError::VideoEncodeError(format!("frame {next_frame} has no source image"))
                    })?;
                    let frame = frames.frame(source_index)?;
                    if frame.width() != self.config.width
                        || frame.height() != self.config.height
                        || frame.data().len() != frame_len
                    {
                        return Err(ReelError::VideoEncodeError(format!(
                            "frame for image {source_index} is {}x{}, encoder expects {}x{}",
                            frame.width(),
                            frame.height(),
                            self.config.width,
                            self.config.height
                        )));
                    }

                    let end = frame_offset.saturating_add(slot.capacity).min(frame_len);
                    let presentation_time_us = schedule.presentation_time_us(next_frame);
                    self.codec.submit(
                        slot,
                        &frame.data()[frame_offset..end],
                        presentation_time_us,
                        SampleFlags::empty(),
                    )?;
                    log::trace!(
                        "Submitted frame {next_frame} bytes {frame_offset}..{end} at {presentation_time_us} us"
                    );

                    frame_offset = end;
                    if frame_offset == frame_len {
                        frame_offset = 0;
                        next_frame += 1;
                        if let Some(progress) = self.progress.as_mut() {
                            progress.advance(Some(presentation_time_us));
                        }
                    }
                } else {
                    let presentation_time_us = schedule.last_presentation_time_us();
                    self.codec.submit(
                        slot,
                        &[],
                        presentation_time_us,
                        SampleFlags::END_OF_STREAM,
                    )?;
                    log::debug!("Submitted end of stream at {presentation_time_us} us");
                    self.state = SessionState::Draining;
                }
            }

            match self.codec.acquire_output(self.poll_timeout)? {
                OutputEvent::TryAgainLater => {}
                OutputEvent::FormatChanged(format) => {
                    if track.is_some() {
                        return Err(ReelError::VideoEncodeError(
                            "encoder output format changed twice".to_string(),
                        ));
                    }
                    let index = self.writer.add_track(&format.sanitized())?;
                    self.writer.start()?;
                    log::debug!("Registered video track {index}: {}", format.mime);
                    track = Some((index, format));
                }
                OutputEvent::Sample { index, sample } => {
                    // Codec-config payloads are carried by the track registration.
                    let payload_len = if sample.is_codec_config() { 0 } else { sample.len() };
                    if payload_len > 0 {
                        let (track_index, _) = track.as_ref().ok_or_else(|| {
                            ReelError::VideoEncodeError(
                                "encoder produced a sample before announcing its format"
                                    .to_string(),
                            )
                        })?;
                        self.writer.write_sample(*track_index, &sample)?;
                        samples_written += 1;
                        last_presentation_time_us = Some(sample.presentation_time_us);
                        log::trace!(
                            "Wrote video sample at {} us ({} bytes)",
                            sample.presentation_time_us,
                            payload_len
                        );
                    }
                    self.codec.release(index)?;

                    if sample.is_end_of_stream() {
                        if self.state != SessionState::Draining {
                            return Err(ReelError::VideoEncodeError(
                                "encoder ended the stream before all frames were submitted"
                                    .to_string(),
                            ));
                        }
                        let (_, track) = track.ok_or_else(|| {
                            ReelError::VideoEncodeError(
                                "encoder ended the stream without announcing its format"
                                    .to_string(),
                            )
                        })?;
                        self.finalize()?;
                        log::info!(
                            "Encoded {next_frame} frames into {samples_written} samples"
                        );
                        return Ok(EncodeSummary {
                            frames_submitted: next_frame,
                            samples_written,
                            last_presentation_time_us,
                            track,
                        });
                    }
                }
            }
        }
    }

    fn finalize(&mut self) -> Result<(), ReelError> {
        let finished = self.writer.finish();
        self.codec.stop();
        finished?;
        if let Some(progress) = self.progress.as_mut() {
            progress.finish();
        }
        self.state = SessionState::Finalized;
        Ok(())
    }

    fn fail(&mut self) {
        self.teardown();
        self.state = SessionState::Failed;
    }

    fn teardown(&mut self) {
        self.codec.stop();
        if let Err(error) = self.writer.finish() {
            log::warn!("Failed to release video writer: {error}");
        }
    }
}

impl Drop for EncodeSession {
    fn drop(&mut self) {
        if matches!(
            self.state,
            SessionState::Configuring | SessionState::Running | SessionState::Draining
        ) {
            self.teardown();
        }
    }
}
