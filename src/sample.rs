//! Elementary-stream data model.
//!
//! [`SampleBuffer`] is the unit moved between decoders, encoders, and
//! container writers; [`MediaTrack`] describes one elementary stream as it is
//! probed from a container or announced by an encoder.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::{BitOr, BitOrAssign};

/// Mime type of H.264 / AVC video.
pub const MIME_VIDEO_AVC: &str = "video/avc";
/// Mime type of H.265 / HEVC video.
pub const MIME_VIDEO_HEVC: &str = "video/hevc";
/// Mime type of AAC audio inside an ISO-base-media container.
pub const MIME_AUDIO_AAC: &str = "audio/mp4a-latm";
/// Mime type of MPEG-1/2 audio (MP3).
pub const MIME_AUDIO_MPEG: &str = "audio/mpeg";
/// Mime type of raw linear PCM (signed 16-bit, interleaved).
pub const MIME_AUDIO_RAW: &str = "audio/raw";

/// AAC Low Complexity object type.
pub const AAC_PROFILE_LC: u32 = 2;

/// Maximum number of codec-initialisation payloads kept on a track.
pub const MAX_CODEC_CONFIG_PAYLOADS: usize = 3;

/// Returns `true` when `mime` names a legacy lossy codec (MPEG audio) that
/// ISO-base-media writers reject and that must be transcoded first.
pub fn is_legacy_lossy(mime: &str) -> bool {
    let mime = mime.to_ascii_lowercase();
    mime == MIME_AUDIO_MPEG || mime.contains("mpeg") || mime.contains("mp3")
}

/// Per-sample flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SampleFlags(u8);

impl SampleFlags {
    /// The sample can be decoded without reference to earlier samples.
    pub const KEYFRAME: SampleFlags = SampleFlags(0b001);
    /// The sample carries codec initialisation data, not media.
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(0b010);
    /// The last sample of the stream.
    pub const END_OF_STREAM: SampleFlags = SampleFlags(0b100);

    /// No flags set.
    pub const fn empty() -> Self {
        SampleFlags(0)
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build flags from raw bits, discarding unknown bits.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        SampleFlags(bits & 0b111)
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Clear the flags in `other`.
    #[must_use]
    pub const fn without(self, other: SampleFlags) -> Self {
        SampleFlags(self.0 & !other.0)
    }
}

impl BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SampleFlags {
    fn bitor_assign(&mut self, rhs: SampleFlags) {
        self.0 |= rhs.0;
    }
}

/// A byte payload with an explicit presentation timestamp and flags.
///
/// Timestamps are in microseconds and are monotonically non-decreasing
/// within one track. A buffer is never shared between tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    /// Encoded (or raw PCM) payload.
    pub data: Vec<u8>,
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    /// Keyframe / codec-config / end-of-stream flags.
    pub flags: SampleFlags,
}

impl SampleBuffer {
    /// Create a sample from its parts.
    pub fn new(data: Vec<u8>, presentation_time_us: i64, flags: SampleFlags) -> Self {
        Self {
            data,
            presentation_time_us,
            flags,
        }
    }

    /// An empty sample carrying only the end-of-stream flag.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self::new(Vec::new(), presentation_time_us, SampleFlags::END_OF_STREAM)
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(SampleFlags::KEYFRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(SampleFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }

    /// Clone the sample with a new presentation timestamp.
    #[must_use]
    pub fn retimed(&self, presentation_time_us: i64) -> Self {
        Self {
            data: self.data.clone(),
            presentation_time_us,
            flags: self.flags,
        }
    }
}

/// The kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

impl Display for TrackKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
        }
    }
}

/// Codec-specific parameters of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackParameters {
    /// Video stream parameters.
    Video {
        width: u32,
        height: u32,
        /// Nominal frames per second, when declared.
        frame_rate: Option<u32>,
        /// Seconds between forced keyframes, when declared.
        i_frame_interval: Option<u32>,
    },
    /// Audio stream parameters.
    Audio {
        sample_rate: u32,
        channels: u16,
        /// AAC object type (2 = LC), when declared.
        aac_profile: Option<u32>,
        /// Largest input buffer the codec accepts, when declared.
        max_input_size: Option<usize>,
    },
}

/// Description of one elementary stream.
///
/// Produced by probing a container or by an encoder's output-format
/// announcement; consumed when registering a track with a
/// [`ContainerWriter`](crate::ContainerWriter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    /// Codec mime type, e.g. [`MIME_VIDEO_AVC`].
    pub mime: String,
    /// Resolution or sample-rate/channel parameters.
    pub parameters: TrackParameters,
    /// Bit rate in bits per second, when known.
    pub bit_rate: Option<u64>,
    /// Track duration in microseconds, when known.
    pub duration_us: Option<i64>,
    /// Opaque codec-initialisation payloads (`csd-0`, `csd-1`, ...).
    pub codec_config: Vec<Vec<u8>>,
    /// Any other key/value pairs reported by the prober.
    pub extra: BTreeMap<String, String>,
}

impl MediaTrack {
    /// A video track with the given mime type and resolution.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime: mime.into(),
            parameters: TrackParameters::Video {
                width,
                height,
                frame_rate: None,
                i_frame_interval: None,
            },
            bit_rate: None,
            duration_us: None,
            codec_config: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// An audio track with the given mime type, sample rate, and channel count.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            mime: mime.into(),
            parameters: TrackParameters::Audio {
                sample_rate,
                channels,
                aac_profile: None,
                max_input_size: None,
            },
            bit_rate: None,
            duration_us: None,
            codec_config: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self.parameters {
            TrackParameters::Video { .. } => TrackKind::Video,
            TrackParameters::Audio { .. } => TrackKind::Audio,
        }
    }

    /// Returns `(sample_rate, channels)` for audio tracks.
    pub fn audio_format(&self) -> Option<(u32, u16)> {
        match self.parameters {
            TrackParameters::Audio {
                sample_rate,
                channels,
                ..
            } => Some((sample_rate, channels)),
            TrackParameters::Video { .. } => None,
        }
    }

    /// Returns `(width, height)` for video tracks.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.parameters {
            TrackParameters::Video { width, height, .. } => Some((width, height)),
            TrackParameters::Audio { .. } => None,
        }
    }

    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    #[must_use]
    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    /// Append a codec-initialisation payload.
    #[must_use]
    pub fn with_codec_config(mut self, payload: Vec<u8>) -> Self {
        self.codec_config.push(payload);
        self
    }

    /// Copy of the track reduced to the parameters a container writer needs.
    ///
    /// Keeps the mime type, the codec parameters, the bit rate, and at most
    /// [`MAX_CODEC_CONFIG_PAYLOADS`] codec-initialisation payloads. Duration
    /// and every prober-specific key are dropped; writers reject tracks that
    /// carry keys they do not understand.
    #[must_use]
    pub fn sanitized(&self) -> Self {
        Self {
            mime: self.mime.clone(),
            parameters: self.parameters.clone(),
            bit_rate: self.bit_rate,
            duration_us: None,
            codec_config: self
                .codec_config
                .iter()
                .take(MAX_CODEC_CONFIG_PAYLOADS)
                .cloned()
                .collect(),
            extra: BTreeMap::new(),
        }
    }
}
