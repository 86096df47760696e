//! In-memory media backend for integration tests.
//!
//! Containers are JSON files holding track descriptions and sample
//! timestamps, so the whole pipeline runs without FFmpeg. The fake codecs
//! follow the buffer-queue contract and can be told to misbehave.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reelmaker::sample::{AAC_PROFILE_LC, MIME_AUDIO_AAC, MIME_AUDIO_RAW};
use reelmaker::{
    Codec, CodecConfig, ContainerWriter, InputSlot, MediaBackend, MediaTrack, OutputEvent,
    ReelError, SampleBuffer, SampleFlags, TrackKind, TrackParameters, TrackReader,
};
use serde_json::{Value, json};

/// PCM frames produced per compressed sample by [`FakeAudioDecoder`].
pub const DECODED_FRAMES_PER_SAMPLE: usize = 1152;
/// PCM frames consumed per AAC sample by [`FakeAacEncoder`].
pub const AAC_FRAME_SIZE: usize = 1024;
pub const TEST_SAMPLE_RATE: u32 = 44_100;
pub const TEST_CHANNELS: u16 = 2;

// ── Container files ────────────────────────────────────────────────

/// Parsed contents of a JSON container.
#[derive(Debug, Clone, Default)]
pub struct Container {
    pub tracks: Vec<MediaTrack>,
    pub samples: Vec<(usize, SampleBuffer)>,
}

impl Container {
    pub fn load(path: &Path) -> Result<Self, ReelError> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            ReelError::DecodeError(format!("cannot open {}: {error}", path.display()))
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|error| {
            ReelError::DecodeError(format!("{} is not a container: {error}", path.display()))
        })?;

        let tracks = value["tracks"]
            .as_array()
            .ok_or_else(|| ReelError::DecodeError("container has no track list".to_string()))?
            .iter()
            .map(track_from_json)
            .collect::<Result<Vec<_>, _>>()?;
        let samples = value["samples"]
            .as_array()
            .map(|samples| samples.iter().map(sample_from_json).collect())
            .unwrap_or_default();
        Ok(Self { tracks, samples })
    }

    pub fn save(&self, path: &Path) {
        let value = json!({
            "tracks": self.tracks.iter().map(track_to_json).collect::<Vec<_>>(),
            "samples": self
                .samples
                .iter()
                .map(|(track, sample)| json!({
                    "track": track,
                    "pts": sample.presentation_time_us,
                    "flags": sample.flags.bits(),
                    "data": sample.data,
                }))
                .collect::<Vec<_>>(),
        });
        std::fs::write(path, value.to_string()).expect("write container");
    }

    pub fn track_of_kind(&self, kind: TrackKind) -> Option<usize> {
        self.tracks.iter().position(|track| track.kind() == kind)
    }

    pub fn samples_of(&self, track: usize) -> Vec<&SampleBuffer> {
        self.samples
            .iter()
            .filter(|(index, _)| *index == track)
            .map(|(_, sample)| sample)
            .collect()
    }

    pub fn video_samples(&self) -> Vec<&SampleBuffer> {
        self.track_of_kind(TrackKind::Video)
            .map(|index| self.samples_of(index))
            .unwrap_or_default()
    }

    pub fn audio_samples(&self) -> Vec<&SampleBuffer> {
        self.track_of_kind(TrackKind::Audio)
            .map(|index| self.samples_of(index))
            .unwrap_or_default()
    }
}

fn track_to_json(track: &MediaTrack) -> Value {
    let mut value = json!({
        "mime": track.mime,
        "bit_rate": track.bit_rate,
        "duration_us": track.duration_us,
        "codec_config": track.codec_config,
        "extra": track.extra,
    });
    match track.parameters {
        TrackParameters::Video {
            width,
            height,
            frame_rate,
            i_frame_interval,
        } => {
            value["kind"] = json!("video");
            value["width"] = json!(width);
            value["height"] = json!(height);
            value["frame_rate"] = json!(frame_rate);
            value["i_frame_interval"] = json!(i_frame_interval);
        }
        TrackParameters::Audio {
            sample_rate,
            channels,
            aac_profile,
            max_input_size,
        } => {
            value["kind"] = json!("audio");
            value["sample_rate"] = json!(sample_rate);
            value["channels"] = json!(channels);
            value["aac_profile"] = json!(aac_profile);
            value["max_input_size"] = json!(max_input_size);
        }
    }
    value
}

fn track_from_json(value: &Value) -> Result<MediaTrack, ReelError> {
    let mime = value["mime"].as_str().unwrap_or_default().to_string();
    let number = |key: &str| value[key].as_u64();
    let mut track = match value["kind"].as_str() {
        Some("video") => {
            let mut track = MediaTrack::video(
                mime,
                number("width").unwrap_or(0) as u32,
                number("height").unwrap_or(0) as u32,
            );
            track.parameters = TrackParameters::Video {
                width: number("width").unwrap_or(0) as u32,
                height: number("height").unwrap_or(0) as u32,
                frame_rate: number("frame_rate").map(|rate| rate as u32),
                i_frame_interval: number("i_frame_interval").map(|seconds| seconds as u32),
            };
            track
        }
        Some("audio") => {
            let mut track = MediaTrack::audio(
                mime,
                number("sample_rate").unwrap_or(0) as u32,
                number("channels").unwrap_or(0) as u16,
            );
            track.parameters = TrackParameters::Audio {
                sample_rate: number("sample_rate").unwrap_or(0) as u32,
                channels: number("channels").unwrap_or(0) as u16,
                aac_profile: number("aac_profile").map(|profile| profile as u32),
                max_input_size: number("max_input_size").map(|size| size as usize),
            };
            track
        }
        other => {
            return Err(ReelError::DecodeError(format!("unknown track kind {other:?}")));
        }
    };
    track.bit_rate = number("bit_rate");
    track.duration_us = value["duration_us"].as_i64();
    if let Some(payloads) = value["codec_config"].as_array() {
        track.codec_config = payloads.iter().map(bytes_from_json).collect();
    }
    if let Some(extra) = value["extra"].as_object() {
        for (key, entry) in extra {
            track
                .extra
                .insert(key.clone(), entry.as_str().unwrap_or_default().to_string());
        }
    }
    Ok(track)
}

fn bytes_from_json(value: &Value) -> Vec<u8> {
    value
        .as_array()
        .map(|bytes| bytes.iter().map(|byte| byte.as_u64().unwrap_or(0) as u8).collect())
        .unwrap_or_default()
}

fn sample_from_json(value: &Value) -> (usize, SampleBuffer) {
    (
        value["track"].as_u64().unwrap_or(0) as usize,
        SampleBuffer::new(
            bytes_from_json(&value["data"]),
            value["pts"].as_i64().unwrap_or(0),
            SampleFlags::from_bits_truncate(value["flags"].as_u64().unwrap_or(0) as u8),
        ),
    )
}

// ── Fixtures ───────────────────────────────────────────────────────

/// Write a solid-colour PNG.
pub fn write_image(dir: &Path, name: &str, width: u32, height: u32, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(width, height, image::Rgb(rgb))
        .save(&path)
        .expect("write image");
    path
}

/// Write an audio container with one sample every `spacing_us` covering
/// `duration_us`.
pub fn write_audio(dir: &Path, name: &str, mime: &str, duration_us: i64, spacing_us: i64) -> PathBuf {
    let path = dir.join(name);
    let track = MediaTrack::audio(mime, TEST_SAMPLE_RATE, TEST_CHANNELS)
        .with_bit_rate(128_000)
        .with_duration_us(duration_us);
    let samples = (0..)
        .map(|index: i64| index * spacing_us)
        .take_while(|pts| *pts < duration_us)
        .map(|pts| (0, SampleBuffer::new(vec![0xF1, 0xF2, 0xF3], pts, SampleFlags::KEYFRAME)))
        .collect();
    Container {
        tracks: vec![track],
        samples,
    }
    .save(&path);
    path
}

/// Write a container with a single video track and no audio.
pub fn write_video_only(dir: &Path, name: &str, frames: u32, frame_rate: u32) -> PathBuf {
    let path = dir.join(name);
    let samples = (0..frames)
        .map(|index| {
            let pts = i64::from(index) * 1_000_000 / i64::from(frame_rate);
            (0, SampleBuffer::new(vec![index as u8], pts, SampleFlags::KEYFRAME))
        })
        .collect();
    Container {
        tracks: vec![MediaTrack::video("video/avc", 640, 480)],
        samples,
    }
    .save(&path);
    path
}

/// The luma value the BT.601 studio-swing conversion gives a solid colour.
pub fn expected_luma(rgb: [u8; 3]) -> u8 {
    let [r, g, b] = rgb.map(i32::from);
    (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8
}

// ── Backend ────────────────────────────────────────────────────────

/// How the fake video encoder behaves.
#[derive(Debug, Clone, Default)]
pub struct VideoEncoderBehavior {
    /// Input slot size; defaults to the configured maximum input size.
    pub slot_capacity: Option<usize>,
    /// After the first input slot, report an unbounded slot capacity.
    pub unbounded_after_first_slot: bool,
    /// Every `n`-th input acquisition times out.
    pub busy_every: Option<usize>,
    /// Announce the output format a second time after the first sample.
    pub announce_twice: bool,
    /// Emit a codec-config sample right after the format announcement.
    pub emit_codec_config: bool,
    /// Emit the first sample before announcing the format.
    pub sample_before_format: bool,
    /// Refuse the profile in `configure`.
    pub fail_configure: bool,
}

/// Knobs shared by every resource a [`JsonBackend`] creates.
#[derive(Debug, Clone, Default)]
pub struct BackendRules {
    pub video: VideoEncoderBehavior,
    /// Writers reject tracks with these mime types.
    pub rejected_mimes: Vec<String>,
    /// Writers fail every audio sample write.
    pub fail_audio_writes: bool,
    /// `create_decoder` fails.
    pub no_decoder: bool,
    /// Writers fail to open for paths with a component starting with this prefix.
    pub unwritable_prefix: Option<String>,
}

/// Counters recorded by every resource a [`JsonBackend`] creates.
#[derive(Debug, Default)]
pub struct BackendLog {
    pub codecs_created: Vec<String>,
    pub codecs_stopped: usize,
    pub writers_finished: usize,
    pub readers_opened: usize,
}

#[derive(Debug, Clone, Default)]
pub struct JsonBackend {
    pub rules: BackendRules,
    pub log: Arc<Mutex<BackendLog>>,
}

impl JsonBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video_behavior(mut self, behavior: VideoEncoderBehavior) -> Self {
        self.rules.video = behavior;
        self
    }

    pub fn rejecting(mut self, mime: &str) -> Self {
        self.rules.rejected_mimes.push(mime.to_string());
        self
    }

    pub fn failing_audio_writes(mut self) -> Self {
        self.rules.fail_audio_writes = true;
        self
    }

    pub fn without_decoder(mut self) -> Self {
        self.rules.no_decoder = true;
        self
    }

    pub fn with_unwritable_prefix(mut self, prefix: &str) -> Self {
        self.rules.unwritable_prefix = Some(prefix.to_string());
        self
    }

    pub fn codecs_created(&self) -> Vec<String> {
        self.log.lock().expect("log").codecs_created.clone()
    }

    pub fn codecs_stopped(&self) -> usize {
        self.log.lock().expect("log").codecs_stopped
    }
}

impl MediaBackend for JsonBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn TrackReader>, ReelError> {
        let container = Container::load(path)?;
        self.log.lock().expect("log").readers_opened += 1;
        Ok(Box::new(JsonReader::new(container)))
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, ReelError> {
        if let Some(prefix) = &self.rules.unwritable_prefix {
            let locked = path
                .components()
                .any(|part| part.as_os_str().to_string_lossy().starts_with(prefix.as_str()));
            if locked {
                return Err(ReelError::ResourceError {
                    path: path.to_path_buf(),
                    reason: "read-only location".to_string(),
                });
            }
        }
        Ok(Box::new(JsonWriter::new(path, self.rules.clone(), self.log.clone())))
    }

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn Codec>, ReelError> {
        self.log.lock().expect("log").codecs_created.push(format!("encoder:{mime}"));
        match mime {
            "video/avc" | "video/hevc" => Ok(Box::new(FakeVideoEncoder::new(
                self.rules.video.clone(),
                self.log.clone(),
            ))),
            MIME_AUDIO_AAC => Ok(Box::new(FakeAacEncoder::new(self.log.clone()))),
            other => Err(ReelError::InvalidInput(format!("no encoder for {other}"))),
        }
    }

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn Codec>, ReelError> {
        if self.rules.no_decoder {
            return Err(ReelError::InvalidInput(format!("no decoder for {mime}")));
        }
        self.log.lock().expect("log").codecs_created.push(format!("decoder:{mime}"));
        Ok(Box::new(FakeAudioDecoder::new(self.log.clone())))
    }
}

// ── Reader / writer ────────────────────────────────────────────────

pub struct JsonReader {
    tracks: Vec<MediaTrack>,
    samples: Vec<Vec<SampleBuffer>>,
    selected: Option<usize>,
    cursor: usize,
}

impl JsonReader {
    pub fn new(container: Container) -> Self {
        let mut samples = vec![Vec::new(); container.tracks.len()];
        for (track, sample) in container.samples {
            if let Some(list) = samples.get_mut(track) {
                list.push(sample);
            }
        }
        Self {
            tracks: container.tracks,
            samples,
            selected: None,
            cursor: 0,
        }
    }
}

impl TrackReader for JsonReader {
    fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<(), ReelError> {
        if index >= self.tracks.len() {
            return Err(ReelError::InvalidInput(format!("no track {index}")));
        }
        self.selected = Some(index);
        self.cursor = 0;
        Ok(())
    }

    fn seek_to_start(&mut self) -> Result<(), ReelError> {
        self.cursor = 0;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<SampleBuffer>, ReelError> {
        let selected = self
            .selected
            .ok_or_else(|| ReelError::InvalidInput("no track selected".to_string()))?;
        let sample = self.samples[selected].get(self.cursor).cloned();
        if sample.is_some() {
            self.cursor += 1;
        }
        Ok(sample)
    }
}

pub struct JsonWriter {
    path: PathBuf,
    rules: BackendRules,
    log: Arc<Mutex<BackendLog>>,
    container: Container,
    last_pts: Vec<Option<i64>>,
    started: bool,
    finished: bool,
}

impl JsonWriter {
    fn new(path: &Path, rules: BackendRules, log: Arc<Mutex<BackendLog>>) -> Self {
        Self {
            path: path.to_path_buf(),
            rules,
            log,
            container: Container::default(),
            last_pts: Vec::new(),
            started: false,
            finished: false,
        }
    }
}

impl ContainerWriter for JsonWriter {
    fn add_track(&mut self, track: &MediaTrack) -> Result<usize, ReelError> {
        if self.started || self.finished {
            return Err(ReelError::MergeError("writer already started".to_string()));
        }
        if self.rules.rejected_mimes.contains(&track.mime) {
            return Err(ReelError::MergeError(format!("writer rejects {}", track.mime)));
        }
        if !track.extra.is_empty() || track.duration_us.is_some() {
            return Err(ReelError::MergeError("track carries unknown keys".to_string()));
        }
        self.container.tracks.push(track.clone());
        self.last_pts.push(None);
        Ok(self.container.tracks.len() - 1)
    }

    fn start(&mut self) -> Result<(), ReelError> {
        if self.started || self.finished {
            return Err(ReelError::MergeError("writer started twice".to_string()));
        }
        if self.container.tracks.is_empty() {
            return Err(ReelError::MergeError("writer has no tracks".to_string()));
        }
        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> Result<(), ReelError> {
        if !self.started || self.finished {
            return Err(ReelError::MergeError("writer not started".to_string()));
        }
        let track = self
            .container
            .tracks
            .get(track_index)
            .ok_or_else(|| ReelError::MergeError(format!("no track {track_index}")))?;
        if self.rules.fail_audio_writes && track.kind() == TrackKind::Audio {
            return Err(ReelError::MergeError("audio write failed".to_string()));
        }
        if sample.is_empty() || sample.is_end_of_stream() || sample.is_codec_config() {
            return Err(ReelError::MergeError("not a media sample".to_string()));
        }
        if self.last_pts[track_index].is_some_and(|last| sample.presentation_time_us < last) {
            return Err(ReelError::MergeError(format!(
                "timestamp {} goes backwards on track {track_index}",
                sample.presentation_time_us
            )));
        }
        self.last_pts[track_index] = Some(sample.presentation_time_us);
        self.container.samples.push((track_index, sample.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ReelError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.log.lock().expect("log").writers_finished += 1;
        if self.started {
            self.container.save(&self.path);
        }
        Ok(())
    }
}

// ── Codecs ─────────────────────────────────────────────────────────

/// Output queue with release bookkeeping.
#[derive(Default)]
struct Outputs {
    events: VecDeque<OutputEvent>,
    outstanding: BTreeSet<usize>,
    next_index: usize,
}

impl Outputs {
    fn push_format(&mut self, track: MediaTrack) {
        self.events.push_back(OutputEvent::FormatChanged(track));
    }

    fn push_sample(&mut self, sample: SampleBuffer) {
        self.events.push_back(OutputEvent::Sample {
            index: self.next_index,
            sample,
        });
        self.next_index += 1;
    }

    fn pop(&mut self) -> OutputEvent {
        let event = self.events.pop_front().unwrap_or(OutputEvent::TryAgainLater);
        if let OutputEvent::Sample { index, .. } = &event {
            self.outstanding.insert(*index);
        }
        event
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        if self.outstanding.remove(&index) {
            Ok(())
        } else {
            Err(ReelError::VideoEncodeError(format!("output {index} released twice")))
        }
    }
}

pub struct FakeVideoEncoder {
    behavior: VideoEncoderBehavior,
    log: Arc<Mutex<BackendLog>>,
    config: Option<reelmaker::VideoEncoderConfig>,
    staged: Vec<u8>,
    staged_pts: i64,
    frames_encoded: u64,
    announced: bool,
    input_closed: bool,
    acquisitions: usize,
    outputs: Outputs,
    stopped: bool,
}

impl FakeVideoEncoder {
    pub fn new(behavior: VideoEncoderBehavior, log: Arc<Mutex<BackendLog>>) -> Self {
        Self {
            behavior,
            log,
            config: None,
            staged: Vec::new(),
            staged_pts: 0,
            frames_encoded: 0,
            announced: false,
            input_closed: false,
            acquisitions: 0,
            outputs: Outputs::default(),
            stopped: false,
        }
    }

    fn format(&self, config: &reelmaker::VideoEncoderConfig) -> MediaTrack {
        let mut track = MediaTrack::video(config.mime.clone(), config.width, config.height)
            .with_bit_rate(config.bit_rate)
            .with_codec_config(vec![0, 0, 0, 1, 0x67, 0x42])
            .with_codec_config(vec![0, 0, 0, 1, 0x68]);
        track.parameters = TrackParameters::Video {
            width: config.width,
            height: config.height,
            frame_rate: Some(config.frame_rate),
            i_frame_interval: Some(config.i_frame_interval),
        };
        track.extra.insert("encoder-name".to_string(), "fake".to_string());
        track
    }

    fn encode_frame(&mut self, frame: Vec<u8>) {
        let Some(config) = self.config.clone() else {
            return;
        };
        let keyframe_every = u64::from(config.frame_rate * config.i_frame_interval.max(1));
        let flags = if self.frames_encoded % keyframe_every == 0 {
            SampleFlags::KEYFRAME
        } else {
            SampleFlags::empty()
        };
        let sample = SampleBuffer::new(
            vec![self.frames_encoded as u8, frame[0], frame[frame.len() - 1]],
            self.staged_pts,
            flags,
        );

        if !self.announced && !self.behavior.sample_before_format {
            self.outputs.push_format(self.format(&config));
            self.announced = true;
            if self.behavior.emit_codec_config {
                self.outputs.push_sample(SampleBuffer::new(
                    vec![0, 0, 0, 1, 0x67, 0x42],
                    0,
                    SampleFlags::CODEC_CONFIG,
                ));
            }
        }
        self.outputs.push_sample(sample);
        if self.behavior.announce_twice && self.frames_encoded == 0 {
            self.outputs.push_format(self.format(&config));
        }
        self.frames_encoded += 1;
    }
}

impl Codec for FakeVideoEncoder {
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError> {
        if self.behavior.fail_configure {
            return Err(ReelError::VideoEncodeError("profile refused".to_string()));
        }
        match config {
            CodecConfig::VideoEncoder(config) => {
                self.config = Some(config.clone());
                Ok(())
            }
            _ => Err(ReelError::VideoEncodeError("not a video profile".to_string())),
        }
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, ReelError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ReelError::VideoEncodeError("not configured".to_string()))?;
        self.acquisitions += 1;
        if self.input_closed {
            return Ok(None);
        }
        if self
            .behavior
            .busy_every
            .is_some_and(|every| self.acquisitions % every == 0)
        {
            return Ok(None);
        }
        let capacity = if self.behavior.unbounded_after_first_slot && self.acquisitions > 1 {
            usize::MAX
        } else {
            self.behavior.slot_capacity.unwrap_or(config.max_input_size)
        };
        Ok(Some(InputSlot {
            index: self.acquisitions,
            capacity,
        }))
    }

    fn submit(
        &mut self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError> {
        let frame_len = self
            .config
            .as_ref()
            .map(|config| config.max_input_size)
            .ok_or_else(|| ReelError::VideoEncodeError("not configured".to_string()))?;
        if self.input_closed {
            return Err(ReelError::VideoEncodeError("submit after end of stream".to_string()));
        }
        if data.len() > slot.capacity {
            return Err(ReelError::VideoEncodeError("submission exceeds slot".to_string()));
        }
        if !data.is_empty() {
            if self.staged.is_empty() {
                self.staged_pts = presentation_time_us;
            }
            self.staged.extend_from_slice(data);
            if self.staged.len() == frame_len {
                let frame = std::mem::take(&mut self.staged);
                self.encode_frame(frame);
            }
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.input_closed = true;
            self.outputs.push_sample(SampleBuffer::end_of_stream(presentation_time_us));
        }
        Ok(())
    }

    fn acquire_output(&mut self, _timeout: Duration) -> Result<OutputEvent, ReelError> {
        Ok(self.outputs.pop())
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        self.outputs.release(index)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.log.lock().expect("log").codecs_stopped += 1;
        }
    }
}

/// Decodes every compressed sample into [`DECODED_FRAMES_PER_SAMPLE`] PCM
/// frames of silence.
pub struct FakeAudioDecoder {
    log: Arc<Mutex<BackendLog>>,
    format: Option<(u32, u16)>,
    announced: bool,
    input_closed: bool,
    outputs: Outputs,
    stopped: bool,
}

impl FakeAudioDecoder {
    pub fn new(log: Arc<Mutex<BackendLog>>) -> Self {
        Self {
            log,
            format: None,
            announced: false,
            input_closed: false,
            outputs: Outputs::default(),
            stopped: false,
        }
    }
}

impl Codec for FakeAudioDecoder {
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError> {
        match config {
            CodecConfig::AudioDecoder(track) => {
                self.format = track.audio_format();
                Ok(())
            }
            _ => Err(ReelError::TranscodeError("not a decoder profile".to_string())),
        }
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, ReelError> {
        if self.format.is_none() {
            return Err(ReelError::TranscodeError("not configured".to_string()));
        }
        if self.input_closed {
            return Ok(None);
        }
        Ok(Some(InputSlot {
            index: 0,
            capacity: 64 * 1024,
        }))
    }

    fn submit(
        &mut self,
        _slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError> {
        let (sample_rate, channels) = self
            .format
            .ok_or_else(|| ReelError::TranscodeError("not configured".to_string()))?;
        if !data.is_empty() {
            if !self.announced {
                self.outputs
                    .push_format(MediaTrack::audio(MIME_AUDIO_RAW, sample_rate, channels));
                self.announced = true;
            }
            let pcm = vec![0u8; DECODED_FRAMES_PER_SAMPLE * usize::from(channels) * 2];
            self.outputs
                .push_sample(SampleBuffer::new(pcm, presentation_time_us, SampleFlags::empty()));
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.input_closed = true;
            self.outputs.push_sample(SampleBuffer::end_of_stream(presentation_time_us));
        }
        Ok(())
    }

    fn acquire_output(&mut self, _timeout: Duration) -> Result<OutputEvent, ReelError> {
        Ok(self.outputs.pop())
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        self.outputs.release(index)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.log.lock().expect("log").codecs_stopped += 1;
        }
    }
}

/// Packs every [`AAC_FRAME_SIZE`] PCM frames into one AAC sample.
pub struct FakeAacEncoder {
    log: Arc<Mutex<BackendLog>>,
    config: Option<reelmaker::AudioEncoderConfig>,
    pending_frames: usize,
    produced: i64,
    first_pts: Option<i64>,
    announced: bool,
    input_closed: bool,
    outputs: Outputs,
    stopped: bool,
}

impl FakeAacEncoder {
    pub fn new(log: Arc<Mutex<BackendLog>>) -> Self {
        Self {
            log,
            config: None,
            pending_frames: 0,
            produced: 0,
            first_pts: None,
            announced: false,
            input_closed: false,
            outputs: Outputs::default(),
            stopped: false,
        }
    }

    fn emit(&mut self, config: &reelmaker::AudioEncoderConfig) {
        if !self.announced {
            let mut track = MediaTrack::audio(MIME_AUDIO_AAC, config.sample_rate, config.channels)
                .with_bit_rate(config.bit_rate)
                .with_codec_config(vec![0x12, 0x10]);
            track.parameters = TrackParameters::Audio {
                sample_rate: config.sample_rate,
                channels: config.channels,
                aac_profile: Some(AAC_PROFILE_LC),
                max_input_size: Some(config.max_input_size),
            };
            self.outputs.push_format(track);
            self.announced = true;
        }
        let pts = self.first_pts.unwrap_or(0)
            + self.produced * AAC_FRAME_SIZE as i64 * 1_000_000 / i64::from(config.sample_rate);
        self.outputs.push_sample(SampleBuffer::new(
            vec![0xAA, self.produced as u8],
            pts,
            SampleFlags::KEYFRAME,
        ));
        self.produced += 1;
    }
}

impl Codec for FakeAacEncoder {
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError> {
        match config {
            CodecConfig::AudioEncoder(config) => {
                self.config = Some(config.clone());
                Ok(())
            }
            _ => Err(ReelError::TranscodeError("not an encoder profile".to_string())),
        }
    }

    fn acquire_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, ReelError> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ReelError::TranscodeError("not configured".to_string()))?;
        if self.input_closed {
            return Ok(None);
        }
        Ok(Some(InputSlot {
            index: 0,
            capacity: config.max_input_size,
        }))
    }

    fn submit(
        &mut self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| ReelError::TranscodeError("not configured".to_string()))?;
        if data.len() > slot.capacity {
            return Err(ReelError::TranscodeError("submission exceeds slot".to_string()));
        }
        let frame_bytes = usize::from(config.channels) * 2;
        if data.len() % frame_bytes != 0 {
            return Err(ReelError::TranscodeError("partial PCM frame".to_string()));
        }
        if !data.is_empty() {
            self.first_pts.get_or_insert(presentation_time_us);
            self.pending_frames += data.len() / frame_bytes;
            while self.pending_frames >= AAC_FRAME_SIZE {
                self.pending_frames -= AAC_FRAME_SIZE;
                self.emit(&config);
            }
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            if self.pending_frames > 0 {
                self.pending_frames = 0;
                self.emit(&config);
            }
            self.input_closed = true;
            self.outputs.push_sample(SampleBuffer::end_of_stream(presentation_time_us));
        }
        Ok(())
    }

    fn acquire_output(&mut self, _timeout: Duration) -> Result<OutputEvent, ReelError> {
        Ok(self.outputs.pop())
    }

    fn release(&mut self, index: usize) -> Result<(), ReelError> {
        self.outputs.release(index)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.log.lock().expect("log").codecs_stopped += 1;
        }
    }
}
