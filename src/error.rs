//! Error types for the `reelmaker` crate.
//!
//! This module defines [`ReelError`], the unified error type returned by all
//! fallible operations in the crate. The variants follow the pipeline's
//! failure taxonomy: some are fatal to a job, others are swallowed by the
//! orchestrator into a degraded, video-only result (see
//! [`ReelError::is_audio_recoverable`]).

use std::{io::Error as IoError, path::PathBuf};

use image::ImageError;
use thiserror::Error;

/// The unified error type for all `reelmaker` operations.
///
/// Every public method that can fail returns `Result<T, ReelError>`.
/// Variants carry a human-readable cause so callers can surface them
/// without additional logging at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReelError {
    /// An image or audio source could not be parsed. Fatal to the job.
    #[error("Failed to decode input: {0}")]
    DecodeError(String),

    /// The video codec or container writer violated its protocol while the
    /// video track was being produced. Fatal to the job.
    #[error("Video encoding error: {0}")]
    VideoEncodeError(String),

    /// The audio source could not be normalised into a container-compatible
    /// codec. The job continues without audio.
    #[error("Audio transcode error: {0}")]
    TranscodeError(String),

    /// A track was rejected while merging audio and video.
    #[error("Merge error: {0}")]
    MergeError(String),

    /// A scratch or output file could not be created or removed.
    #[error("Resource error at {path}: {reason}")]
    ResourceError {
        /// The file or directory involved.
        path: PathBuf,
        /// Underlying reason the operation failed.
        reason: String,
    },

    /// The job description itself is unusable (no images, zero frame rate,
    /// missing audio file, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The probed container does not contain a video track.
    #[error("No video track found in container")]
    NoVideoTrack,

    /// The probed container does not contain an audio track.
    #[error("No audio track found in container")]
    NoAudioTrack,

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while decoding or fitting a still.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),
}

impl ReelError {
    /// Returns `true` for failures that only cost the job its audio track.
    ///
    /// Transcode failures, a missing audio track, and audio-side merge
    /// rejections degrade the result to a video-only container instead of
    /// failing the job.
    pub fn is_audio_recoverable(&self) -> bool {
        matches!(
            self,
            ReelError::TranscodeError(_) | ReelError::NoAudioTrack | ReelError::MergeError(_)
        )
    }

    /// Re-tag any error raised while producing the video track as a
    /// [`ReelError::VideoEncodeError`], keeping the original message.
    /// Image decode failures keep their own variant.
    pub(crate) fn into_video_encode(self) -> ReelError {
        match self {
            ReelError::VideoEncodeError(_) | ReelError::DecodeError(_) => self,
            other => ReelError::VideoEncodeError(other.to_string()),
        }
    }

    /// Re-tag any error raised on the audio normalisation path as a
    /// [`ReelError::TranscodeError`].
    pub(crate) fn into_transcode(self) -> ReelError {
        match self {
            ReelError::TranscodeError(_) => self,
            other => ReelError::TranscodeError(other.to_string()),
        }
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Error> for ReelError {
    fn from(error: ffmpeg_next::Error) -> Self {
        ReelError::FfmpegError(error.to_string())
    }
}
