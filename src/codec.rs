//! Codec and container capability interfaces.
//!
//! Hardware and software codec APIs expose asynchronous, index-based buffer
//! queues rather than owned memory. The traits in this module model them as
//! an opaque handle plus four capabilities (acquire an input slot, submit it,
//! acquire an output event, release it) so the polling loops in
//! [`EncodeSession`](crate::EncodeSession) and
//! [`AudioTranscoder`](crate::AudioTranscoder) run unchanged on top of
//! synchronous, callback-based, or future-based codec libraries.
//!
//! A [`MediaBackend`] is the factory for all three resource kinds: codecs,
//! container writers, and container readers (probe cursors).

use std::path::Path;
use std::time::Duration;

use crate::error::ReelError;
use crate::sample::{MediaTrack, SampleBuffer, SampleFlags, TrackKind};

/// An input buffer handed out by [`Codec::acquire_input`].
///
/// The slot must be passed back to [`Codec::submit`] exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    /// Codec-defined buffer index.
    pub index: usize,
    /// Number of bytes the slot can hold.
    pub capacity: usize,
}

/// Result of polling a codec's output queue.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    /// Nothing was ready within the poll timeout.
    TryAgainLater,
    /// The codec announced (or changed) its output format.
    FormatChanged(MediaTrack),
    /// An output sample is ready. `index` must be handed back to
    /// [`Codec::release`] once the payload has been consumed.
    Sample {
        index: usize,
        sample: SampleBuffer,
    },
}

/// Fixed video encoding profile passed to [`Codec::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    /// Output codec mime type.
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Target bit rate in bits per second.
    pub bit_rate: u64,
    /// Seconds between keyframes.
    pub i_frame_interval: u32,
    /// Largest input submission in bytes; sized to one planar 4:2:0 frame.
    pub max_input_size: usize,
}

/// Audio encoding profile passed to [`Codec::configure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEncoderConfig {
    /// Output codec mime type.
    pub mime: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Target bit rate in bits per second.
    pub bit_rate: u64,
    /// AAC object type (2 = LC).
    pub aac_profile: u32,
    /// Largest input submission in bytes.
    pub max_input_size: usize,
}

/// What a codec is being configured to do.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecConfig {
    /// Encode planar 4:2:0 frames into a compressed video stream.
    VideoEncoder(VideoEncoderConfig),
    /// Encode interleaved signed 16-bit PCM into a compressed audio stream.
    AudioEncoder(AudioEncoderConfig),
    /// Decode the described compressed audio track into interleaved signed
    /// 16-bit PCM.
    AudioDecoder(MediaTrack),
}

/// A stateful codec driven through a buffer queue.
///
/// Codecs are not idempotent: once a session has failed it must be torn
/// down with [`stop`](Codec::stop), never resumed.
pub trait Codec {
    /// Apply the profile. Must be called exactly once, before any other
    /// queue operation.
    fn configure(&mut self, config: &CodecConfig) -> Result<(), ReelError>;

    /// Try to obtain an empty input slot, waiting at most `timeout`.
    fn acquire_input(&mut self, timeout: Duration) -> Result<Option<InputSlot>, ReelError>;

    /// Queue `data` (at most `slot.capacity` bytes) with its presentation
    /// timestamp. An empty submission with
    /// [`SampleFlags::END_OF_STREAM`] ends the input side.
    fn submit(
        &mut self,
        slot: InputSlot,
        data: &[u8],
        presentation_time_us: i64,
        flags: SampleFlags,
    ) -> Result<(), ReelError>;

    /// Poll the output queue, waiting at most `timeout`.
    fn acquire_output(&mut self, timeout: Duration) -> Result<OutputEvent, ReelError>;

    /// Return an output slot obtained from [`acquire_output`](Codec::acquire_output).
    fn release(&mut self, index: usize) -> Result<(), ReelError>;

    /// Stop the codec and free every resource it holds. Infallible and
    /// idempotent; called on every exit path.
    fn stop(&mut self);
}

/// A container writer with two-phase track registration.
///
/// Every track that will ever be written must be registered with
/// [`add_track`](ContainerWriter::add_track) before
/// [`start`](ContainerWriter::start); `start` happens exactly once.
pub trait ContainerWriter {
    /// Register a track and return its writer-side index. Fails with a
    /// rejection when the writer cannot carry the track's format.
    fn add_track(&mut self, track: &MediaTrack) -> Result<usize, ReelError>;

    /// Freeze the track list and begin accepting samples.
    fn start(&mut self) -> Result<(), ReelError>;

    /// Append one sample to a registered track.
    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> Result<(), ReelError>;

    /// Stop and release the writer. Idempotent; a writer that was never
    /// started releases its resources without producing a file trailer.
    fn finish(&mut self) -> Result<(), ReelError>;
}

/// A probe cursor over a container's tracks.
pub trait TrackReader {
    /// Every track found in the container, in container order.
    fn tracks(&self) -> &[MediaTrack];

    /// Restrict [`read_sample`](TrackReader::read_sample) to one track.
    fn select_track(&mut self, index: usize) -> Result<(), ReelError>;

    /// Rewind the cursor to the first sample of the selected track.
    fn seek_to_start(&mut self) -> Result<(), ReelError>;

    /// Read the next sample of the selected track, or `None` at the end.
    fn read_sample(&mut self) -> Result<Option<SampleBuffer>, ReelError>;
}

/// Factory for codecs, writers, and readers.
///
/// Every resource it hands out is scoped to one job.
pub trait MediaBackend {
    /// Open a probe cursor over the container at `path`.
    fn open_reader(&self, path: &Path) -> Result<Box<dyn TrackReader>, ReelError>;

    /// Create an ISO-base-media container writer at `path`.
    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, ReelError>;

    /// Create an unconfigured encoder producing `mime`.
    fn create_encoder(&self, mime: &str) -> Result<Box<dyn Codec>, ReelError>;

    /// Create an unconfigured decoder consuming `mime`.
    fn create_decoder(&self, mime: &str) -> Result<Box<dyn Codec>, ReelError>;
}

/// Locate the first track of `kind`, returning its reader index and a copy.
pub fn find_track(reader: &dyn TrackReader, kind: TrackKind) -> Option<(usize, MediaTrack)> {
    reader
        .tracks()
        .iter()
        .enumerate()
        .find(|(_, track)| track.kind() == kind)
        .map(|(index, track)| (index, track.clone()))
}

/// Probe the duration of the first audio track at `path`, in microseconds.
///
/// # Errors
///
/// - [`ReelError::NoAudioTrack`] if the container has no audio track.
/// - [`ReelError::DecodeError`] if the track does not declare a duration.
pub fn probe_audio_duration(backend: &dyn MediaBackend, path: &Path) -> Result<i64, ReelError> {
    let reader = backend.open_reader(path)?;
    let (_, track) = find_track(reader.as_ref(), TrackKind::Audio).ok_or(ReelError::NoAudioTrack)?;
    match track.duration_us {
        Some(duration) if duration > 0 => Ok(duration),
        _ => Err(ReelError::DecodeError(format!(
            "audio track in {} does not declare a duration",
            path.display()
        ))),
    }
}
