//! Job configuration.
//!
//! [`VideoMakerOptions`] is a builder that threads the encoding profiles,
//! canvas policy, scratch directories, and progress callback through a
//! [`VideoMaker`](crate::VideoMaker) without polluting every entry point's
//! signature.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use reelmaker::{EncoderProfile, VideoMakerOptions};
//!
//! let options = VideoMakerOptions::new()
//!     .with_encoder_profile(EncoderProfile::default().with_frame_rate(25))
//!     .with_poll_timeout(Duration::from_millis(5))
//!     .with_output_dir("/tmp/reels");
//! assert_eq!(options.encoder_profile().frame_rate, 25);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::progress::{NoOpProgress, ProgressCallback};
use crate::sample::{MIME_AUDIO_AAC, MIME_VIDEO_AVC};
use crate::scratch::{ClockNames, NameSource};

/// Default codec poll timeout.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Fixed video encoding profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    /// Frames per second (default: 30).
    pub frame_rate: u32,
    /// Target bit rate in bits per second (default: 2 Mbit/s).
    pub bit_rate: u64,
    /// Seconds between keyframes (default: 1).
    pub i_frame_interval_seconds: u32,
    /// Output codec mime type (default: `video/avc`).
    pub mime: String,
}

impl Default for EncoderProfile {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            bit_rate: 2_000_000,
            i_frame_interval_seconds: 1,
            mime: MIME_VIDEO_AVC.to_string(),
        }
    }
}

impl EncoderProfile {
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    #[must_use]
    pub fn with_i_frame_interval(mut self, seconds: u32) -> Self {
        self.i_frame_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = mime.into();
        self
    }
}

/// Audio re-encoding profile and container allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProfile {
    /// AAC bit rate in bits per second (default: 128 kbit/s).
    pub bit_rate: u64,
    /// Largest PCM submission to the AAC encoder, in bytes (default: 16 KiB).
    pub max_input_size: usize,
    /// Audio mime types the container writer accepts without transcoding.
    pub accepted_codecs: Vec<String>,
}

impl Default for AudioProfile {
    fn default() -> Self {
        Self {
            bit_rate: 128_000,
            max_input_size: 16_384,
            accepted_codecs: vec![MIME_AUDIO_AAC.to_string(), "audio/aac".to_string()],
        }
    }
}

impl AudioProfile {
    #[must_use]
    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    #[must_use]
    pub fn with_max_input_size(mut self, bytes: usize) -> Self {
        self.max_input_size = bytes;
        self
    }

    /// Replace the list of codecs copied into the container as-is.
    #[must_use]
    pub fn with_accepted_codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if `mime` can be muxed without transcoding.
    pub fn accepts(&self, mime: &str) -> bool {
        self.accepted_codecs
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(mime))
    }
}

/// How the video canvas is derived from the first image.
///
/// See [`canvas_dimensions`](crate::raster::canvas_dimensions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasPolicy {
    /// Length of the canvas's long edge (default: 1280).
    pub long_edge: u32,
    /// Minimum length of either edge (default: 480).
    pub min_edge: u32,
}

impl Default for CanvasPolicy {
    fn default() -> Self {
        Self {
            long_edge: 1280,
            min_edge: 480,
        }
    }
}

/// Configuration for a [`VideoMaker`](crate::VideoMaker).
///
/// All fields have defaults matching the stock profile: 30 fps H.264 at
/// 2 Mbit/s, AAC at 128 kbit/s, a 1280-pixel long edge.
#[derive(Clone)]
pub struct VideoMakerOptions {
    pub(crate) encoder: EncoderProfile,
    pub(crate) audio: AudioProfile,
    pub(crate) canvas: CanvasPolicy,
    pub(crate) poll_timeout: Duration,
    pub(crate) temp_dir: PathBuf,
    pub(crate) output_dir: Option<PathBuf>,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) batch_size: u64,
    pub(crate) names: Arc<dyn NameSource>,
}

impl Debug for VideoMakerOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("VideoMakerOptions")
            .field("encoder", &self.encoder)
            .field("audio", &self.audio)
            .field("canvas", &self.canvas)
            .field("poll_timeout", &self.poll_timeout)
            .field("temp_dir", &self.temp_dir)
            .field("output_dir", &self.output_dir())
            .field("has_progress", &true)
            .field("batch_size", &self.batch_size)
            .field("names", &self.names)
            .finish()
    }
}

impl Default for VideoMakerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoMakerOptions {
    /// Create options with default settings.
    ///
    /// Scratch files go to [`std::env::temp_dir`] and finished videos to its
    /// `videos` subdirectory.
    pub fn new() -> Self {
        Self {
            encoder: EncoderProfile::default(),
            audio: AudioProfile::default(),
            canvas: CanvasPolicy::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            temp_dir: std::env::temp_dir(),
            output_dir: None,
            progress: Arc::new(NoOpProgress),
            batch_size: 1,
            names: Arc::new(ClockNames::new()),
        }
    }

    #[must_use]
    pub fn with_encoder_profile(mut self, profile: EncoderProfile) -> Self {
        self.encoder = profile;
        self
    }

    /// Shorthand for changing only the encoder frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.encoder.frame_rate = frame_rate;
        self
    }

    #[must_use]
    pub fn with_audio_profile(mut self, profile: AudioProfile) -> Self {
        self.audio = profile;
        self
    }

    #[must_use]
    pub fn with_canvas_policy(mut self, policy: CanvasPolicy) -> Self {
        self.canvas = policy;
        self
    }

    /// Set the bounded wait used for every codec queue poll.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the directory for intermediate files.
    #[must_use]
    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Set the directory for generated output names.
    ///
    /// Only used by jobs that do not name their output explicitly.
    #[must_use]
    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Set how often the progress callback fires.
    ///
    /// A value of 1 means every item; 30 means every 30th item.
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Replace the source of scratch and output file identifiers.
    #[must_use]
    pub fn with_name_source(mut self, names: Arc<dyn NameSource>) -> Self {
        self.names = names;
        self
    }

    pub fn encoder_profile(&self) -> &EncoderProfile {
        &self.encoder
    }

    pub fn audio_profile(&self) -> &AudioProfile {
        &self.audio
    }

    pub fn canvas_policy(&self) -> &CanvasPolicy {
        &self.canvas
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Directory for generated output names; `<temp_dir>/videos` unless set.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.temp_dir.join("videos"))
    }
}
