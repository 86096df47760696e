//! Job orchestration.
//!
//! [`VideoMaker`] turns a [`VideoJob`] (images, optional audio, a duration)
//! into a finished MP4. It validates the inputs, sizes the canvas from the
//! first image, encodes the video, prepares and adapts the audio, and merges
//! the two, degrading to a video-only result whenever the audio cannot be
//! used.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use reelmaker::{FfmpegBackend, VideoMaker};
//!
//! let maker = VideoMaker::new(FfmpegBackend::new()?);
//! let output = maker.images_to_video_with_audio(["a.jpg", "b.jpg"], "song.mp3", 10)?;
//! println!("{} ({} frames)", output.path.display(), output.video_frames);
//! # }
//! # Ok::<(), reelmaker::ReelError>(())
//! ```

use std::path::{Path, PathBuf};

use crate::adapter::{AudioAdjustment, AudioDurationAdapter};
use crate::codec::{MediaBackend, TrackReader, VideoEncoderConfig, probe_audio_duration};
use crate::color::{PlanarFrame, image_to_planar};
use crate::configuration::VideoMakerOptions;
use crate::error::ReelError;
use crate::merge::{ContainerMerger, MergeOutcome};
use crate::progress::{OperationType, ProgressTracker};
use crate::raster::{RasterFitter, canvas_dimensions, probe_dimensions};
use crate::schedule::FrameSchedule;
use crate::scratch::{ScratchFiles, named_path};
use crate::session::{EncodeSession, FrameSource};
use crate::transcode::AudioTranscoder;

/// One image-to-video request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoJob {
    /// Source images, shown in order.
    pub images: Vec<PathBuf>,
    /// Optional soundtrack.
    pub audio: Option<PathBuf>,
    /// Target duration in whole seconds. Zero yields one second.
    pub duration_seconds: u32,
    /// Output path. Generated under the output directory when `None`.
    pub output: Option<PathBuf>,
}

impl VideoJob {
    pub fn new<I, P>(images: I, duration_seconds: u32) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            images: images.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
            audio: None,
            duration_seconds,
            output: None,
        }
    }

    #[must_use]
    pub fn with_audio<P: AsRef<Path>>(mut self, audio: P) -> Self {
        self.audio = Some(audio.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn with_output<P: AsRef<Path>>(mut self, output: P) -> Self {
        self.output = Some(output.as_ref().to_path_buf());
        self
    }
}

/// What happened to the requested audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutcome {
    /// The job had no audio.
    NotRequested,
    /// The output carries an audio track.
    Included { adjustment: AudioAdjustment },
    /// Audio was requested but left out; the output is video-only.
    Dropped { reason: String },
}

/// A finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    /// The finalized container.
    pub path: PathBuf,
    pub audio: AudioOutcome,
    /// Frames encoded into the video track.
    pub video_frames: u64,
    /// Canvas size `(width, height)`.
    pub canvas: (u32, u32),
    pub schedule: FrameSchedule,
}

/// Strip a `file://` scheme, decode `%20`, and trim whitespace.
pub fn clean_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let raw = path.as_ref().to_string_lossy();
    let trimmed = raw.trim();
    let without_scheme = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    PathBuf::from(without_scheme.replace("%20", " ").trim())
}

/// Builds slideshow videos through a [`MediaBackend`].
pub struct VideoMaker<B: MediaBackend> {
    backend: B,
    options: VideoMakerOptions,
}

impl<B: MediaBackend> VideoMaker<B> {
    /// Create a maker with default options.
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, VideoMakerOptions::default())
    }

    pub fn with_options(backend: B, options: VideoMakerOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &VideoMakerOptions {
        &self.options
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// One still image held for `duration_seconds`.
    pub fn image_to_video<P: AsRef<Path>>(
        &self,
        image: P,
        duration_seconds: u32,
    ) -> Result<JobOutput, ReelError> {
        self.make(&VideoJob::new([image], duration_seconds))
    }

    /// A slideshow of `images` spread over `duration_seconds`.
    pub fn images_to_video<I, P>(&self, images: I, duration_seconds: u32) -> Result<JobOutput, ReelError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.make(&VideoJob::new(images, duration_seconds))
    }

    /// One still image with a soundtrack.
    pub fn image_to_video_with_audio<P, Q>(
        &self,
        image: P,
        audio: Q,
        duration_seconds: u32,
    ) -> Result<JobOutput, ReelError>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.make(&VideoJob::new([image], duration_seconds).with_audio(audio))
    }

    /// A slideshow with a soundtrack.
    pub fn images_to_video_with_audio<I, P, Q>(
        &self,
        images: I,
        audio: Q,
        duration_seconds: u32,
    ) -> Result<JobOutput, ReelError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.make(&VideoJob::new(images, duration_seconds).with_audio(audio))
    }

    /// Run a job to completion.
    ///
    /// # Errors
    ///
    /// - [`ReelError::InvalidInput`] for an empty image list, a missing audio
    ///   file, or a zero frame rate.
    /// - [`ReelError::DecodeError`] if an image is missing or cannot be
    ///   decoded, or the audio source cannot be parsed.
    /// - [`ReelError::VideoEncodeError`] if the video track cannot be
    ///   produced.
    /// - [`ReelError::ResourceError`] if the output cannot be written.
    ///
    /// Audio transcoding and audio-track registration failures are not
    /// errors: the job succeeds with [`AudioOutcome::Dropped`].
    ///
    /// The output path is only written once the job has succeeded; on error
    /// it is left as it was.
    pub fn make(&self, job: &VideoJob) -> Result<JobOutput, ReelError> {
        let images: Vec<PathBuf> = job.images.iter().map(clean_path).collect();
        let audio = job.audio.as_ref().map(clean_path);
        log::info!(
            "Making video from {} image(s), {} s, audio: {}",
            images.len(),
            job.duration_seconds,
            audio.as_ref().map_or("none".into(), |path| path.display().to_string())
        );

        validate_inputs(&images, audio.as_deref())?;

        let (source_width, source_height) = probe_dimensions(&images[0])?;
        let canvas = canvas_dimensions(&self.options.canvas, source_width, source_height)?;
        let schedule = FrameSchedule::build(
            images.len(),
            self.options.encoder.frame_rate,
            job.duration_seconds,
        )?;
        let target_us = schedule.duration_us();

        let output = match &job.output {
            Some(path) => clean_path(path),
            None => named_path(
                self.options.names.as_ref(),
                &self.options.output_dir(),
                "video",
                "mp4",
            ),
        };
        let output_dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        ensure_dir(&output_dir)?;

        // Assembled beside the output, renamed into place on success.
        let mut scratch = ScratchFiles::new();
        let staged = scratch.create(&output_dir, ".reel_", "mp4")?;

        let mut audio_outcome = AudioOutcome::NotRequested;
        let audio_source = match audio {
            None => None,
            Some(path) => match probe_audio_duration(&self.backend, &path) {
                Ok(duration_us) => {
                    log::debug!("Audio {} lasts {duration_us} us", path.display());
                    Some((path, duration_us))
                }
                Err(error) if error.is_audio_recoverable() => {
                    log::warn!("Audio {} unusable: {error}", path.display());
                    audio_outcome = AudioOutcome::Dropped {
                        reason: error.to_string(),
                    };
                    None
                }
                Err(error @ ReelError::DecodeError(_)) => return Err(error),
                Err(error) => {
                    return Err(ReelError::DecodeError(format!("{}: {error}", path.display())));
                }
            },
        };

        let video_path = if audio_source.is_some() {
            ensure_dir(&self.options.temp_dir)?;
            scratch.create(&self.options.temp_dir, "temp_video_", "mp4")?
        } else {
            staged.clone()
        };

        let video_frames = self.encode_video(&images, canvas, &schedule, &video_path)?;

        if let Some((audio_path, audio_duration_us)) = audio_source {
            audio_outcome = self.attach_audio(
                &video_path,
                &audio_path,
                audio_duration_us,
                &staged,
                target_us,
                &mut scratch,
            )?;
        }

        scratch.persist(&staged, &output)?;
        scratch.cleanup();
        log::info!("Finished {} ({:?})", output.display(), audio_outcome);

        Ok(JobOutput {
            path: output,
            audio: audio_outcome,
            video_frames,
            canvas,
            schedule,
        })
    }

    fn encode_video(
        &self,
        images: &[PathBuf],
        canvas: (u32, u32),
        schedule: &FrameSchedule,
        output: &Path,
    ) -> Result<u64, ReelError> {
        let (width, height) = canvas;
        let profile = &self.options.encoder;
        let config = VideoEncoderConfig {
            mime: profile.mime.clone(),
            width,
            height,
            frame_rate: profile.frame_rate,
            bit_rate: profile.bit_rate,
            i_frame_interval: profile.i_frame_interval_seconds,
            max_input_size: PlanarFrame::byte_len(width, height),
        };

        let tracker = ProgressTracker::new(
            self.options.progress.clone(),
            OperationType::VideoEncoding,
            Some(schedule.total_frames()),
            self.options.batch_size,
        );
        let mut session = EncodeSession::open(&self.backend, config, output, self.options.poll_timeout)?
            .with_progress(tracker);
        session.configure()?;

        let mut frames = ImageFrames::new(images, RasterFitter::new(width, height)?);
        let summary = session.run(schedule, &mut frames)?;
        Ok(summary.frames_submitted)
    }

    /// Prepare, adapt, and merge the audio. Only fatal errors are returned;
    /// every audio-side failure becomes [`AudioOutcome::Dropped`].
    fn attach_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        audio_duration_us: i64,
        output: &Path,
        target_us: i64,
        scratch: &mut ScratchFiles,
    ) -> Result<AudioOutcome, ReelError> {
        let work_path = scratch.create(&self.options.temp_dir, "converted_", "m4a")?;
        let progress = self.options.progress.clone();
        let batch_size = self.options.batch_size;

        let adapted = AudioTranscoder::new(
            &self.backend,
            self.options.audio.clone(),
            self.options.poll_timeout,
        )
        .with_progress(progress.clone(), batch_size)
        .prepare(audio_path, &work_path)
        .and_then(|prepared| {
            let mut reader = self
                .backend
                .open_reader(&prepared.path)
                .map_err(ReelError::into_transcode)?;
            AudioDurationAdapter::new(target_us)
                .with_progress(progress.clone(), batch_size)
                .adapt(reader.as_mut(), audio_duration_us)
                .map_err(ReelError::into_transcode)
        });

        let merger = ContainerMerger::new(&self.backend).with_progress(progress, batch_size);
        let (mut adapted, dropped) = match adapted {
            Ok(adapted) => (Some(adapted), None),
            Err(error) => {
                log::warn!("Continuing without audio: {error}");
                (None, Some(error.to_string()))
            }
        };
        let adjustment = adapted.as_ref().map(|audio| audio.adjustment());

        let merged = merger.merge(
            video_path,
            adapted.as_mut().map(|audio| audio as &mut dyn TrackReader),
            output,
            target_us,
        );

        let outcome = match merged {
            Ok(MergeOutcome::Merged { .. }) => match adjustment {
                Some(adjustment) => AudioOutcome::Included { adjustment },
                None => AudioOutcome::Dropped {
                    reason: dropped.unwrap_or_default(),
                },
            },
            Ok(MergeOutcome::VideoOnly { reason, .. }) => AudioOutcome::Dropped {
                reason: dropped.unwrap_or(reason),
            },
            Err(error @ ReelError::MergeError(_)) => {
                log::warn!("Audio merge failed ({error}); writing video-only output");
                std::fs::copy(video_path, output).map_err(|copy_error| ReelError::ResourceError {
                    path: output.to_path_buf(),
                    reason: copy_error.to_string(),
                })?;
                AudioOutcome::Dropped {
                    reason: error.to_string(),
                }
            }
            Err(error) => return Err(error),
        };
        Ok(outcome)
    }
}

fn validate_inputs(images: &[PathBuf], audio: Option<&Path>) -> Result<(), ReelError> {
    if images.is_empty() {
        return Err(ReelError::InvalidInput("no images provided".to_string()));
    }
    if let Some(missing) = images.iter().find(|path| !path.is_file()) {
        return Err(ReelError::DecodeError(format!(
            "image not found: {}",
            missing.display()
        )));
    }
    match audio {
        Some(audio) if !audio.is_file() => Err(ReelError::InvalidInput(format!(
            "audio file not found: {}",
            audio.display()
        ))),
        _ => Ok(()),
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ReelError> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|error| ReelError::ResourceError {
        path: dir.to_path_buf(),
        reason: error.to_string(),
    })
}

/// Fits and converts each source image once, when the schedule reaches it.
struct ImageFrames<'a> {
    images: &'a [PathBuf],
    fitter: RasterFitter,
    current: Option<(usize, PlanarFrame)>,
}

impl<'a> ImageFrames<'a> {
    fn new(images: &'a [PathBuf], fitter: RasterFitter) -> Self {
        Self {
            images,
            fitter,
            current: None,
        }
    }
}

impl FrameSource for ImageFrames<'_> {
    fn frame(&mut self, source_index: usize) -> Result<&PlanarFrame, ReelError> {
        let cached = matches!(&self.current, Some((index, _)) if *index == source_index);
        if !cached {
            let path = self.images.get(source_index).ok_or_else(|| {
                ReelError::InvalidInput(format!("no image at index {source_index}"))
            })?;
            let raster = self.fitter.fit_path(path)?;
            log::debug!("Prepared image {source_index}: {}", path.display());
            self.current = Some((source_index, image_to_planar(&raster)));
        }
        match &self.current {
            Some((_, frame)) => Ok(frame),
            None => Err(ReelError::InvalidInput(format!(
                "no frame prepared for image {source_index}"
            ))),
        }
    }
}
