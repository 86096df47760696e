//! # reelmaker
//!
//! Turn still images, and optionally a soundtrack, into MP4 slideshow
//! videos.
//!
//! `reelmaker` letterboxes each image into a fixed canvas, converts it to
//! planar 4:2:0, spreads a fixed frame budget across the images, and drives
//! an H.264 encoder through a cooperative polling loop. When a soundtrack is
//! given it is normalised to AAC, looped or trimmed to the video's duration
//! with sample accuracy, and muxed alongside the video. Audio is
//! best-effort: a soundtrack that cannot be used yields a video-only file,
//! never a failed job.
//!
//! Codecs and containers sit behind the [`MediaBackend`] capability traits.
//! The `ffmpeg` feature provides [`FfmpegBackend`], built on
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next).
//!
//! ## Quick Start
//!
//! ### One Image
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use reelmaker::{FfmpegBackend, VideoMaker};
//!
//! let maker = VideoMaker::new(FfmpegBackend::new().unwrap());
//! let output = maker.image_to_video("cover.jpg", 5).unwrap();
//! println!("wrote {}", output.path.display());
//! # }
//! ```
//!
//! ### Slideshow With Audio
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use reelmaker::{AudioOutcome, FfmpegBackend, VideoJob, VideoMaker};
//!
//! let maker = VideoMaker::new(FfmpegBackend::new().unwrap());
//! let job = VideoJob::new(["a.jpg", "b.jpg", "c.jpg"], 10)
//!     .with_audio("song.mp3")
//!     .with_output("slideshow.mp4");
//! let output = maker.make(&job).unwrap();
//! if let AudioOutcome::Dropped { reason } = &output.audio {
//!     eprintln!("audio left out: {reason}");
//! }
//! # }
//! ```
//!
//! ### Frame Budget
//!
//! ```
//! use reelmaker::FrameSchedule;
//!
//! let schedule = FrameSchedule::build(3, 30, 10).unwrap();
//! assert_eq!(schedule.frame_counts(), vec![100, 100, 100]);
//! ```
//!
//! ## Features
//!
//! - **Letterboxing**: uniform scaling onto an opaque black canvas, with a
//!   power-of-two pre-reduction for very large sources
//! - **Exact frame budget**: `frame_rate × duration` frames, remainder
//!   front-loaded, fixed-point timestamps
//! - **Audio normalisation**: MP3-class sources re-encoded to AAC-LC through
//!   an ordered list of fallback stages
//! - **Sample-accurate looping and trimming** of the soundtrack
//! - **Graceful degradation** to video-only output
//! - **Progress callbacks** per pipeline stage
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | FFmpeg-backed codecs and containers, FFmpeg log control, and the `reelmaker` CLI |
//!
//! ## Requirements
//!
//! The `ffmpeg` feature needs the FFmpeg development libraries (with an
//! H.264 and an AAC encoder) installed on your system.

pub mod adapter;
pub mod codec;
pub mod color;
pub mod configuration;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod maker;
pub mod merge;
pub mod progress;
pub mod raster;
pub mod sample;
pub mod schedule;
pub mod scratch;
pub mod session;
pub mod transcode;

pub use adapter::{AdaptedAudio, AudioAdjustment, AudioDurationAdapter, DurationPlan};
pub use codec::{
    AudioEncoderConfig, Codec, CodecConfig, ContainerWriter, InputSlot, MediaBackend,
    OutputEvent, TrackReader, VideoEncoderConfig, find_track, probe_audio_duration,
};
pub use color::{PlanarFrame, image_to_planar, rgb_to_planar};
pub use configuration::{AudioProfile, CanvasPolicy, EncoderProfile, VideoMakerOptions};
pub use error::ReelError;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegBackend, FfmpegLogLevel, set_ffmpeg_log_level};
pub use maker::{AudioOutcome, JobOutput, VideoJob, VideoMaker, clean_path};
pub use merge::{ContainerMerger, MergeOutcome};
pub use progress::{OperationType, ProgressCallback, ProgressInfo};
pub use raster::{DEFAULT_MAX_DECODE_BYTES, RasterFitter, canvas_dimensions, probe_dimensions};
pub use sample::{MediaTrack, SampleBuffer, SampleFlags, TrackKind, TrackParameters};
pub use schedule::{FrameSchedule, ScheduleSlot, presentation_time_us, total_frames};
pub use scratch::{ClockNames, NameSource, SequentialNames};
pub use session::{EncodeSession, EncodeSummary, FrameSource, SessionState};
pub use transcode::{AudioTranscoder, PreparedAudio, TranscodeStage, needs_transcode};
