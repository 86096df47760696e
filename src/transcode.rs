//! Audio normalisation for the MP4 writer.
//!
//! [`AudioTranscoder`] walks an ordered list of [`TranscodeStage`]s and
//! returns the first one that produces a container-compatible audio source.
//! The re-encoding stage decodes the source to interleaved 16-bit PCM and
//! encodes it to AAC-LC at the same sample rate and channel count, driving
//! both codecs through the same cooperative polling loop as
//! [`EncodeSession`](crate::EncodeSession).

use std::collections::VecDeque;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{
    AudioEncoderConfig, Codec, CodecConfig, ContainerWriter, MediaBackend, OutputEvent,
    TrackReader, find_track,
};
use crate::configuration::AudioProfile;
use crate::error::ReelError;
use crate::progress::{OperationType, ProgressCallback, ProgressTracker};
use crate::sample::{AAC_PROFILE_LC, MIME_AUDIO_AAC, MediaTrack, SampleFlags, TrackKind, is_legacy_lossy};
use crate::schedule::MICROS_PER_SECOND;

/// Bytes per interleaved signed 16-bit PCM sample, per channel.
const PCM_BYTES_PER_SAMPLE: usize = 2;

/// One way of producing a container-compatible audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStage {
    /// Use the source as-is. Applies when its codec is on the writer's
    /// allow-list and is not a legacy lossy codec.
    Passthrough,
    /// Decode to PCM and re-encode to AAC-LC.
    ReencodeAac,
}

/// Stages tried, in order, when none are configured explicitly.
pub const DEFAULT_STAGES: [TranscodeStage; 2] =
    [TranscodeStage::Passthrough, TranscodeStage::ReencodeAac];

impl TranscodeStage {
    /// Returns `true` if this stage may be attempted for `track`.
    pub fn applies_to(&self, track: &MediaTrack, profile: &AudioProfile) -> bool {
        match self {
            TranscodeStage::Passthrough => {
                !is_legacy_lossy(&track.mime) && profile.accepts(&track.mime)
            }
            TranscodeStage::ReencodeAac => track.audio_format().is_some(),
        }
    }
}

impl Display for TranscodeStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TranscodeStage::Passthrough => write!(f, "passthrough"),
            TranscodeStage::ReencodeAac => write!(f, "re-encode to AAC"),
        }
    }
}

/// Returns `true` if `track` cannot be muxed as-is under `profile`.
pub fn needs_transcode(track: &MediaTrack, profile: &AudioProfile) -> bool {
    !TranscodeStage::Passthrough.applies_to(track, profile)
}

/// A container-compatible audio source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedAudio {
    /// Container holding the audio track.
    pub path: PathBuf,
    /// The audio track as it will be registered with the writer.
    pub track: MediaTrack,
    /// The stage that produced it.
    pub stage: TranscodeStage,
    /// `true` when `path` is a scratch file created by the transcoder.
    pub is_temporary: bool,
}

/// Produces container-compatible audio through named fallback stages.
pub struct AudioTranscoder<'a> {
    backend: &'a dyn MediaBackend,
    profile: AudioProfile,
    poll_timeout: Duration,
    stages: Vec<TranscodeStage>,
    progress: Option<(Arc<dyn ProgressCallback>, u64)>,
}

impl<'a> AudioTranscoder<'a> {
    /// Create a transcoder using [`DEFAULT_STAGES`].
    pub fn new(backend: &'a dyn MediaBackend, profile: AudioProfile, poll_timeout: Duration) -> Self {
        Self {
            backend,
            profile,
            poll_timeout,
            stages: DEFAULT_STAGES.to_vec(),
            progress: None,
        }
    }

    /// Replace the ordered stage list.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<TranscodeStage>) -> Self {
        self.stages = stages;
        self
    }

    #[must_use]
    pub(crate) fn with_progress(mut self, callback: Arc<dyn ProgressCallback>, batch_size: u64) -> Self {
        self.progress = Some((callback, batch_size));
        self
    }

    /// Produce a container-compatible version of the audio at `source`.
    ///
    /// Stages run in order; the first applicable stage that succeeds wins.
    /// A re-encoding stage writes to `work_path`.
    ///
    /// # Errors
    ///
    /// [`ReelError::TranscodeError`] if the source cannot be opened, has no
    /// audio track, or every applicable stage failed.
    pub fn prepare(&self, source: &Path, work_path: &Path) -> Result<PreparedAudio, ReelError> {
        let mut reader = self
            .backend
            .open_reader(source)
            .map_err(ReelError::into_transcode)?;
        let (index, track) = find_track(reader.as_ref(), TrackKind::Audio).ok_or_else(|| {
            ReelError::TranscodeError(format!("no audio track found in {}", source.display()))
        })?;

        let mut last_error = None;
        for stage in &self.stages {
            if !stage.applies_to(&track, &self.profile) {
                log::debug!("Skipping {stage} for {} audio", track.mime);
                continue;
            }

            let attempt = match stage {
                TranscodeStage::Passthrough => Ok(PreparedAudio {
                    path: source.to_path_buf(),
                    track: track.clone(),
                    stage: *stage,
                    is_temporary: false,
                }),
                TranscodeStage::ReencodeAac => self
                    .reencode(reader.as_mut(), index, &track, work_path)
                    .map(|encoded| PreparedAudio {
                        path: work_path.to_path_buf(),
                        track: encoded,
                        stage: *stage,
                        is_temporary: true,
                    }),
            };

            match attempt {
                Ok(prepared) => {
                    log::info!("Audio prepared by {stage}: {}", prepared.path.display());
                    return Ok(prepared);
                }
                Err(error) => {
                    log::warn!("Audio stage {stage} failed: {error}");
                    last_error = Some(error);
                }
            }
        }

        Err(match last_error {
            Some(error) => error.into_transcode(),
            None => ReelError::TranscodeError(format!(
                "no stage can handle {} audio",
                track.mime
            )),
        })
    }

    fn reencode(
        &self,
        reader: &mut dyn TrackReader,
        track_index: usize,
        track: &MediaTrack,
        output: &Path,
    ) -> Result<MediaTrack, ReelError> {
        let (sample_rate, channels) = track.audio_format().ok_or_else(|| {
            ReelError::TranscodeError(format!("{} is not an audio track", track.mime))
        })?;
        if sample_rate == 0 || channels == 0 {
            return Err(ReelError::TranscodeError(format!(
                "audio track declares {sample_rate} Hz with {channels} channels"
            )));
        }

        log::info!(
            "Re-encoding {} audio ({sample_rate} Hz, {channels} ch) to AAC at {} bps",
            track.mime,
            self.profile.bit_rate
        );

        reader.select_track(track_index)?;
        reader.seek_to_start()?;

        let mut resources = TranscodeResources::default();
        resources.decoder = Some(self.backend.create_decoder(&track.mime)?);
        resources.encoder = Some(self.backend.create_encoder(MIME_AUDIO_AAC)?);
        resources.writer = Some(self.backend.create_writer(output)?);

        let mut pump = Pump {
            reader,
            resources: &mut resources,
            sample_rate,
            channels,
            poll_timeout: self.poll_timeout,
            tracker: self.progress.as_ref().map(|(callback, batch_size)| {
                ProgressTracker::new(
                    callback.clone(),
                    OperationType::AudioTranscoding,
                    None,
                    *batch_size,
                )
            }),
        };
        pump.configure(track, &self.profile)?;
        let encoded = pump.run()?;

        resources.release()?;
        Ok(match track.duration_us {
            Some(duration) => encoded.with_duration_us(duration),
            None => encoded,
        })
    }
}

/// Codec and writer handles for one re-encode; released on drop.
#[derive(Default)]
struct TranscodeResources {
    decoder: Option<Box<dyn Codec>>,
    encoder: Option<Box<dyn Codec>>,
    writer: Option<Box<dyn ContainerWriter>>,
}

impl TranscodeResources {
    fn parts(
        &mut self,
    ) -> Result<(&mut dyn Codec, &mut dyn Codec, &mut dyn ContainerWriter), ReelError> {
        match (&mut self.decoder, &mut self.encoder, &mut self.writer) {
            (Some(decoder), Some(encoder), Some(writer)) => {
                Ok((decoder.as_mut(), encoder.as_mut(), writer.as_mut()))
            }
            _ => Err(ReelError::TranscodeError(
                "transcode resources already released".to_string(),
            )),
        }
    }

    /// Stop both codecs and finish the writer, reporting a writer failure.
    fn release(&mut self) -> Result<(), ReelError> {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
        }
        if let Some(mut encoder) = self.encoder.take() {
            encoder.stop();
        }
        match self.writer.take() {
            Some(mut writer) => writer.finish(),
            None => Ok(()),
        }
    }
}

impl Drop for TranscodeResources {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            log::warn!("Failed to release transcode writer: {error}");
        }
    }
}

/// Decoded PCM waiting for an encoder input slot.
struct PendingPcm {
    data: Vec<u8>,
    offset: usize,
    presentation_time_us: i64,
}

/// State of one decode-to-encode run.
struct Pump<'r> {
    reader: &'r mut dyn TrackReader,
    resources: &'r mut TranscodeResources,
    sample_rate: u32,
    channels: u16,
    poll_timeout: Duration,
    tracker: Option<ProgressTracker>,
}

impl Pump<'_> {
    fn configure(&mut self, track: &MediaTrack, profile: &AudioProfile) -> Result<(), ReelError> {
        let (decoder, encoder, _) = self.resources.parts()?;
        decoder.configure(&CodecConfig::AudioDecoder(track.clone()))?;
        encoder.configure(&CodecConfig::AudioEncoder(AudioEncoderConfig {
            mime: MIME_AUDIO_AAC.to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_rate: profile.bit_rate,
            aac_profile: AAC_PROFILE_LC,
            max_input_size: profile.max_input_size,
        }))
    }

    fn frame_bytes(&self) -> usize {
        PCM_BYTES_PER_SAMPLE * self.channels as usize
    }

    /// Timestamp of the PCM frame `byte_offset` bytes into a buffer that
    /// starts at `start_us`.
    fn pcm_time_us(&self, start_us: i64, byte_offset: usize) -> i64 {
        let frames = (byte_offset / self.frame_bytes()) as i64;
        start_us + frames * MICROS_PER_SECOND / self.sample_rate as i64
    }

    fn run(&mut self) -> Result<MediaTrack, ReelError> {
        let mut extractor_done = false;
        let mut decoder_done = false;
        let mut encoder_eos_sent = false;
        let mut last_input_us: i64 = 0;
        let mut last_pcm_us: i64 = 0;
        let mut pending: VecDeque<PendingPcm> = VecDeque::new();
        let mut registered: Option<(usize, MediaTrack)> = None;
        let mut samples_written: u64 = 0;
        let frame_bytes = self.frame_bytes();
        let timeout = self.poll_timeout;

        loop {
            // Extractor -> decoder.
            if !extractor_done {
                let (decoder, _, _) = self.resources.parts()?;
                if let Some(slot) = decoder.acquire_input(timeout)? {
                    match self.reader.read_sample()? {
                        Some(sample) => {
                            if sample.len() > slot.capacity {
                                return Err(ReelError::TranscodeError(format!(
                                    "compressed sample of {} bytes exceeds decoder slot of {}",
                                    sample.len(),
                                    slot.capacity
                                )));
                            }
                            last_input_us = sample.presentation_time_us;
                            decoder.submit(
                                slot,
                                &sample.data,
                                sample.presentation_time_us,
                                sample.flags.without(SampleFlags::END_OF_STREAM),
                            )?;
                        }
                        None => {
                            decoder.submit(slot, &[], last_input_us, SampleFlags::END_OF_STREAM)?;
                            extractor_done = true;
                            log::debug!("Audio extractor exhausted at {last_input_us} us");
                        }
                    }
                }
            }

            // Decoder -> pending PCM.
            if !decoder_done {
                let (decoder, _, _) = self.resources.parts()?;
                match decoder.acquire_output(timeout)? {
                    OutputEvent::TryAgainLater => {}
                    OutputEvent::FormatChanged(format) => {
                        log::debug!("Decoder output format: {:?}", format.audio_format());
                    }
                    OutputEvent::Sample { index, sample } => {
                        if !sample.is_codec_config() && !sample.is_empty() {
                            if sample.len() % frame_bytes != 0 {
                                return Err(ReelError::TranscodeError(format!(
                                    "decoded PCM of {} bytes is not a whole number of {}-channel frames",
                                    sample.len(),
                                    self.channels
                                )));
                            }
                            pending.push_back(PendingPcm {
                                data: sample.data,
                                offset: 0,
                                presentation_time_us: sample.presentation_time_us,
                            });
                        }
                        decoder.release(index)?;
                        if sample.flags.contains(SampleFlags::END_OF_STREAM) {
                            decoder_done = true;
                            log::debug!("Audio decoder drained");
                        }
                    }
                }
            }

            // Pending PCM -> encoder.
            if !encoder_eos_sent && (!pending.is_empty() || decoder_done) {
                let (_, encoder, _) = self.resources.parts()?;
                if let Some(slot) = encoder.acquire_input(timeout)? {
                    let chunk_limit = slot.capacity - slot.capacity % frame_bytes;
                    match pending.front() {
                        Some(_) if chunk_limit == 0 => {
                            return Err(ReelError::TranscodeError(format!(
                                "encoder input slot of {} bytes cannot hold one PCM frame",
                                slot.capacity
                            )));
                        }
                        Some(front) => {
                            let end = (front.offset + chunk_limit).min(front.data.len());
                            let presentation_time_us =
                                self.pcm_time_us(front.presentation_time_us, front.offset);
                            let (_, encoder, _) = self.resources.parts()?;
                            encoder.submit(
                                slot,
                                &front.data[front.offset..end],
                                presentation_time_us,
                                SampleFlags::empty(),
                            )?;
                            last_pcm_us = presentation_time_us;
                            if end == front.data.len() {
                                pending.pop_front();
                            } else if let Some(front) = pending.front_mut() {
                                front.offset = end;
                            }
                        }
                        None => {
                            encoder.submit(slot, &[], last_pcm_us, SampleFlags::END_OF_STREAM)?;
                            encoder_eos_sent = true;
                            log::debug!("Submitted end of stream to AAC encoder at {last_pcm_us} us");
                        }
                    }
                }
            }

            // Encoder -> writer.
            let (_, encoder, writer) = self.resources.parts()?;
            match encoder.acquire_output(timeout)? {
                OutputEvent::TryAgainLater => {}
                OutputEvent::FormatChanged(format) => {
                    if registered.is_some() {
                        return Err(ReelError::TranscodeError(
                            "AAC encoder output format changed twice".to_string(),
                        ));
                    }
                    let index = writer.add_track(&format.sanitized()).map_err(|error| {
                        ReelError::TranscodeError(format!(
                            "writer rejected the re-encoded audio track: {error}"
                        ))
                    })?;
                    writer.start()?;
                    log::debug!("Registered AAC track {index}");
                    registered = Some((index, format));
                }
                OutputEvent::Sample { index, sample } => {
                    if !sample.is_codec_config() && !sample.is_empty() {
                        let (track_index, _) = registered.as_ref().ok_or_else(|| {
                            ReelError::TranscodeError(
                                "AAC encoder produced a sample before announcing its format"
                                    .to_string(),
                            )
                        })?;
                        writer.write_sample(*track_index, &sample)?;
                        samples_written += 1;
                        if let Some(tracker) = self.tracker.as_mut() {
                            tracker.advance(Some(sample.presentation_time_us));
                        }
                    }
                    encoder.release(index)?;
                    if sample.is_end_of_stream() {
                        let (_, track) = registered.ok_or_else(|| {
                            ReelError::TranscodeError(
                                "AAC encoder ended the stream without announcing its format"
                                    .to_string(),
                            )
                        })?;
                        if let Some(tracker) = self.tracker.as_mut() {
                            tracker.finish();
                        }
                        log::info!("Re-encoded audio into {samples_written} AAC samples");
                        return Ok(track);
                    }
                }
            }
        }
    }
}
