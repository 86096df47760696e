//! FFmpeg-backed implementation of the codec and container traits.
//!
//! [`FfmpegBackend`] hands out an H.264 encoder, an AAC encoder, audio
//! decoders for whatever FFmpeg can decode, MP4 writers, and demuxing
//! readers. FFmpeg's send/receive API is adapted to the slot-based
//! [`Codec`](crate::Codec) contract by queueing output events internally.
//!
//! FFmpeg has its own logging, separate from the [`log`] crate. It prints
//! warnings and errors to stderr by default; use [`set_ffmpeg_log_level`] to
//! tune it.
//!
//! # Example
//!
//! ```no_run
//! use reelmaker::{FfmpegBackend, FfmpegLogLevel, VideoMaker};
//!
//! reelmaker::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! let maker = VideoMaker::new(FfmpegBackend::new().unwrap());
//! ```

mod audio;
mod container;
mod video;

use std::path::Path;
use std::str::FromStr;

use ffmpeg_next::codec::Id;
use ffmpeg_next::util::log::Level;
use ffmpeg_next::Rational;

use crate::codec::{Codec, ContainerWriter, MediaBackend, TrackReader};
use crate::error::ReelError;
use crate::sample::{
    MIME_AUDIO_AAC, MIME_AUDIO_MPEG, MIME_AUDIO_RAW, MIME_VIDEO_AVC, MIME_VIDEO_HEVC,
};

pub use audio::{FfmpegAudioDecoder, FfmpegAudioEncoder};
pub use container::{FfmpegReader, FfmpegWriter};
pub use video::FfmpegVideoEncoder;

/// Microsecond time base used for every timestamp crossing the trait seam.
pub(crate) const MICROSECOND_TIME_BASE: Rational = Rational(1, 1_000_000);

/// How much FFmpeg itself prints to stderr while a job runs.
///
/// Parsed from the CLI's `--log-level` (`quiet`, `error`, `warning`/`warn`,
/// `info`, `debug`, `trace`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    Quiet,
    Error,
    /// FFmpeg's default.
    Warning,
    Info,
    Debug,
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = ReelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "debug" => Ok(FfmpegLogLevel::Debug),
            "trace" => Ok(FfmpegLogLevel::Trace),
            other => Err(ReelError::InvalidInput(format!(
                "unknown FFmpeg log level '{other}'"
            ))),
        }
    }
}

/// Set how much FFmpeg prints to stderr. Rust-side `log` output is not
/// affected.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
    log::debug!("FFmpeg log level set to {level:?}");
}

/// [`MediaBackend`] built on the system FFmpeg libraries.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend {
    _initialized: (),
}

impl FfmpegBackend {
    /// Initialise FFmpeg and return a backend.
    ///
    /// # Errors
    ///
    /// Returns [`ReelError::FfmpegError`] if the libraries fail to
    /// initialise.
    pub fn new() -> Result<Self, ReelError> {
        ffmpeg_next::init()?;
        log::debug!("FFmpeg initialised");
        Ok(Self { _initialized: () })
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn TrackReader>, ReelError> {
        Ok(Box::new(FfmpegReader::open(path)?))
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, ReelError> {
        Ok(Box::new(FfmpegWriter::create(path)?))
    }

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn Codec>, ReelError> {
        match codec_id_for_mime(mime) {
            Some(Id::H264) => Ok(Box::new(FfmpegVideoEncoder::new())),
            Some(Id::AAC) => Ok(Box::new(FfmpegAudioEncoder::new())),
            _ => Err(ReelError::InvalidInput(format!("no encoder for {mime}"))),
        }
    }

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn Codec>, ReelError> {
        let id = codec_id_for_mime(mime)
            .filter(|id| id.medium() == ffmpeg_next::media::Type::Audio)
            .ok_or_else(|| ReelError::InvalidInput(format!("no audio decoder for {mime}")))?;
        if ffmpeg_next::decoder::find(id).is_none() {
            return Err(ReelError::InvalidInput(format!(
                "FFmpeg was built without a {} decoder",
                id.name()
            )));
        }
        Ok(Box::new(FfmpegAudioDecoder::new(id)))
    }
}

/// Map a mime type to an FFmpeg codec id.
pub(crate) fn codec_id_for_mime(mime: &str) -> Option<Id> {
    let mime = mime.to_ascii_lowercase();
    let id = match mime.as_str() {
        MIME_VIDEO_AVC => Id::H264,
        MIME_VIDEO_HEVC => Id::HEVC,
        MIME_AUDIO_AAC | "audio/aac" => Id::AAC,
        MIME_AUDIO_MPEG => Id::MP3,
        MIME_AUDIO_RAW => Id::PCM_S16LE,
        "audio/vorbis" => Id::VORBIS,
        "audio/opus" => Id::OPUS,
        "audio/flac" => Id::FLAC,
        "audio/3gpp" => Id::AMR_NB,
        "audio/amr-wb" => Id::AMR_WB,
        _ => return None,
    };
    Some(id)
}

/// Map an FFmpeg codec id to a mime type.
///
/// Codecs without a well-known mime type map to `<medium>/<ffmpeg name>`.
pub(crate) fn mime_for_codec_id(id: Id) -> String {
    match id {
        Id::H264 => MIME_VIDEO_AVC.to_string(),
        Id::HEVC => MIME_VIDEO_HEVC.to_string(),
        Id::AAC => MIME_AUDIO_AAC.to_string(),
        Id::MP3 => MIME_AUDIO_MPEG.to_string(),
        Id::PCM_S16LE => MIME_AUDIO_RAW.to_string(),
        Id::VORBIS => "audio/vorbis".to_string(),
        Id::OPUS => "audio/opus".to_string(),
        Id::FLAC => "audio/flac".to_string(),
        Id::AMR_NB => "audio/3gpp".to_string(),
        Id::AMR_WB => "audio/amr-wb".to_string(),
        other => {
            let medium = match other.medium() {
                ffmpeg_next::media::Type::Video => "video",
                ffmpeg_next::media::Type::Audio => "audio",
                _ => "application",
            };
            format!("{medium}/{}", other.name())
        }
    }
}

/// Convert a timestamp in `time_base` units to microseconds, rounding to
/// the nearest microsecond.
pub(crate) fn to_micros(timestamp: i64, time_base: Rational) -> i64 {
    let denominator = i128::from(time_base.denominator()).max(1);
    divide_rounded(
        i128::from(timestamp) * i128::from(time_base.numerator()) * 1_000_000,
        denominator,
    )
}

/// Convert microseconds to a timestamp in `time_base` units, rounding to the
/// nearest tick.
pub(crate) fn from_micros(micros: i64, time_base: Rational) -> i64 {
    let numerator = i128::from(time_base.numerator()).max(1);
    divide_rounded(
        i128::from(micros) * i128::from(time_base.denominator()),
        numerator * 1_000_000,
    )
}

/// `value / divisor` rounded half away from zero. `divisor` is positive.
fn divide_rounded(value: i128, divisor: i128) -> i64 {
    let half = divisor / 2;
    let quotient = if value >= 0 {
        (value + half) / divisor
    } else {
        (value - half) / divisor
    };
    quotient as i64
}

/// Copy a codec-initialisation payload out of an FFmpeg-owned buffer.
///
/// # Safety
///
/// `data` must be null or point to at least `size` readable bytes.
pub(crate) unsafe fn read_extradata(data: *const u8, size: i32) -> Option<Vec<u8>> {
    if data.is_null() || size <= 0 {
        return None;
    }
    // SAFETY: guaranteed by the caller.
    Some(unsafe { std::slice::from_raw_parts(data, size as usize) }.to_vec())
}

/// Replace an FFmpeg-owned extradata buffer with a padded copy of `payload`.
///
/// # Safety
///
/// `data` and `size` must point to the `extradata` and `extradata_size`
/// fields of one live `AVCodecContext` or `AVCodecParameters`.
pub(crate) unsafe fn write_extradata(
    data: *mut *mut u8,
    size: *mut i32,
    payload: &[u8],
) -> Result<(), ReelError> {
    let padding = ffmpeg_sys_next::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    // SAFETY: guaranteed by the caller; the buffer is owned by FFmpeg
    // afterwards and freed with the owning struct.
    unsafe {
        ffmpeg_sys_next::av_freep(data.cast());
        let buffer = ffmpeg_sys_next::av_mallocz(payload.len() + padding).cast::<u8>();
        if buffer.is_null() {
            *size = 0;
            return Err(ReelError::FfmpegError("cannot allocate extradata".to_string()));
        }
        std::ptr::copy_nonoverlapping(payload.as_ptr(), buffer, payload.len());
        *data = buffer;
        *size = payload.len() as i32;
    }
    Ok(())
}
