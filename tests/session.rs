mod common;

use std::time::Duration;

use common::{Container, JsonBackend, VideoEncoderBehavior, expected_luma};
use image::{Rgb, RgbImage};
use reelmaker::{
    EncodeSession, FrameSchedule, FrameSource, PlanarFrame, ReelError, SessionState,
    VideoEncoderConfig, image_to_planar,
};

const WIDTH: u32 = 16;
const HEIGHT: u32 = 8;
const POLL: Duration = Duration::from_millis(1);

struct SolidFrames {
    frames: Vec<PlanarFrame>,
    requests: Vec<usize>,
}

impl SolidFrames {
    fn new(colors: &[[u8; 3]]) -> Self {
        Self {
            frames: colors
                .iter()
                .map(|rgb| image_to_planar(&RgbImage::from_pixel(WIDTH, HEIGHT, Rgb(*rgb))))
                .collect(),
            requests: Vec::new(),
        }
    }
}

impl FrameSource for SolidFrames {
    fn frame(&mut self, source_index: usize) -> Result<&PlanarFrame, ReelError> {
        self.requests.push(source_index);
        self.frames
            .get(source_index)
            .ok_or_else(|| ReelError::InvalidInput(format!("no frame {source_index}")))
    }
}

fn config(frame_rate: u32) -> VideoEncoderConfig {
    VideoEncoderConfig {
        mime: "video/avc".to_string(),
        width: WIDTH,
        height: HEIGHT,
        frame_rate,
        bit_rate: 2_000_000,
        i_frame_interval: 1,
        max_input_size: PlanarFrame::byte_len(WIDTH, HEIGHT),
    }
}

fn open(backend: &JsonBackend, output: &std::path::Path, frame_rate: u32) -> EncodeSession {
    EncodeSession::open(backend, config(frame_rate), output, POLL).expect("open session")
}

#[test]
fn encodes_every_scheduled_frame() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("out.mp4");
    let backend = JsonBackend::new();
    let schedule = FrameSchedule::build(2, 10, 2).expect("schedule");
    let mut frames = SolidFrames::new(&[[255, 255, 255], [0, 0, 0]]);

    let mut session = open(&backend, &output, 10);
    assert_eq!(session.state(), SessionState::Configuring);
    session.configure().expect("configure");
    assert_eq!(session.state(), SessionState::Running);

    let summary = session.run(&schedule, &mut frames).expect("run");
    assert_eq!(session.state(), SessionState::Finalized);
    assert_eq!(summary.frames_submitted, 20);
    assert_eq!(summary.samples_written, 20);
    assert_eq!(summary.last_presentation_time_us, Some(1_900_000));
    assert_eq!(summary.track.dimensions(), Some((WIDTH, HEIGHT)));
    assert_eq!(backend.codecs_stopped(), 1);

    let container = Container::load(&output).expect("load");
    let track = &container.tracks[0];
    assert!(track.extra.is_empty());
    assert_eq!(track.codec_config.len(), 2);

    let samples = container.video_samples();
    assert_eq!(samples.len(), 20);
    assert_eq!(samples[9].data[1], expected_luma([255, 255, 255]));
    assert_eq!(samples[10].data[1], expected_luma([0, 0, 0]));
    let keyframes: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, sample)| sample.is_keyframe())
        .map(|(index, _)| index)
        .collect();
    assert_eq!(keyframes, vec![0, 10]);
}

#[test]
fn busy_encoder_is_polled_until_it_accepts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("busy.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        busy_every: Some(2),
        ..Default::default()
    });
    let schedule = FrameSchedule::build(1, 5, 1).expect("schedule");

    let mut session = open(&backend, &output, 5);
    session.configure().expect("configure");
    let summary = session
        .run(&schedule, &mut SolidFrames::new(&[[10, 20, 30]]))
        .expect("run");

    assert_eq!(summary.frames_submitted, 5);
    assert_eq!(Container::load(&output).expect("load").video_samples().len(), 5);
}

#[test]
fn frames_larger_than_a_slot_are_chunked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("chunked.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        slot_capacity: Some(50),
        ..Default::default()
    });
    let schedule = FrameSchedule::build(1, 3, 1).expect("schedule");
    let mut frames = SolidFrames::new(&[[90, 60, 30]]);

    let mut session = open(&backend, &output, 3);
    session.configure().expect("configure");
    let summary = session.run(&schedule, &mut frames).expect("run");

    assert_eq!(summary.samples_written, 3);
    // 192-byte frames in 50-byte slots take four submissions each.
    assert_eq!(frames.requests.len(), 12);
    let samples = Container::load(&output).expect("load");
    let timestamps: Vec<i64> = samples
        .video_samples()
        .iter()
        .map(|sample| sample.presentation_time_us)
        .collect();
    assert_eq!(timestamps, vec![0, 333_333, 666_666]);
}

#[test]
fn unbounded_slot_mid_frame_finishes_the_frame() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("unbounded.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        slot_capacity: Some(50),
        unbounded_after_first_slot: true,
        ..Default::default()
    });
    let schedule = FrameSchedule::build(1, 3, 1).expect("schedule");
    let mut frames = SolidFrames::new(&[[90, 60, 30]]);

    let mut session = open(&backend, &output, 3);
    session.configure().expect("configure");
    let summary = session.run(&schedule, &mut frames).expect("run");

    assert_eq!(summary.samples_written, 3);
    // The first frame is split 50 + 142; the rest go in whole.
    assert_eq!(frames.requests.len(), 4);
    assert_eq!(Container::load(&output).expect("load").video_samples().len(), 3);
}

#[test]
fn codec_config_samples_are_not_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("csd.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        emit_codec_config: true,
        ..Default::default()
    });
    let schedule = FrameSchedule::build(1, 4, 1).expect("schedule");

    let mut session = open(&backend, &output, 4);
    session.configure().expect("configure");
    let summary = session
        .run(&schedule, &mut SolidFrames::new(&[[1, 2, 3]]))
        .expect("run");

    assert_eq!(summary.samples_written, 4);
    let container = Container::load(&output).expect("load");
    assert!(container.video_samples().iter().all(|sample| !sample.is_codec_config()));
}

#[test]
fn second_format_announcement_fails_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("twice.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        announce_twice: true,
        ..Default::default()
    });
    let schedule = FrameSchedule::build(1, 4, 1).expect("schedule");

    let mut session = open(&backend, &output, 4);
    session.configure().expect("configure");
    let result = session.run(&schedule, &mut SolidFrames::new(&[[1, 2, 3]]));

    assert!(matches!(result, Err(ReelError::VideoEncodeError(_))));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(backend.codecs_stopped(), 1);
}

#[test]
fn sample_before_format_fails_the_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("early.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        sample_before_format: true,
        ..Default::default()
    });
    let schedule = FrameSchedule::build(1, 4, 1).expect("schedule");

    let mut session = open(&backend, &output, 4);
    session.configure().expect("configure");
    let result = session.run(&schedule, &mut SolidFrames::new(&[[1, 2, 3]]));

    match result {
        Err(ReelError::VideoEncodeError(message)) => {
            assert!(message.contains("before announcing"), "{message}");
        }
        other => panic!("expected a video encode error, got {other:?}"),
    }
    assert!(!output.exists());
}

#[test]
fn rejected_profile_fails_configuration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("refused.mp4");
    let backend = JsonBackend::new().with_video_behavior(VideoEncoderBehavior {
        fail_configure: true,
        ..Default::default()
    });

    let mut session = open(&backend, &output, 30);
    assert!(matches!(session.configure(), Err(ReelError::VideoEncodeError(_))));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(backend.codecs_stopped(), 1);

    let schedule = FrameSchedule::build(1, 30, 1).expect("schedule");
    assert!(session.run(&schedule, &mut SolidFrames::new(&[[0, 0, 0]])).is_err());
}

#[test]
fn run_before_configure_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = JsonBackend::new();
    let mut session = open(&backend, &dir.path().join("x.mp4"), 30);
    let schedule = FrameSchedule::build(1, 30, 1).expect("schedule");

    assert!(session.run(&schedule, &mut SolidFrames::new(&[[0, 0, 0]])).is_err());
    assert_eq!(session.state(), SessionState::Configuring);
}

#[test]
fn frame_rate_mismatch_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = JsonBackend::new();
    let mut session = open(&backend, &dir.path().join("x.mp4"), 30);
    session.configure().expect("configure");
    let schedule = FrameSchedule::build(1, 25, 1).expect("schedule");

    assert!(session.run(&schedule, &mut SolidFrames::new(&[[0, 0, 0]])).is_err());
    assert_eq!(session.state(), SessionState::Failed);
}

#[test]
fn dropping_an_unfinished_session_stops_the_codec() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = JsonBackend::new();
    {
        let mut session = open(&backend, &dir.path().join("x.mp4"), 30);
        session.configure().expect("configure");
    }
    assert_eq!(backend.codecs_stopped(), 1);
}

#[test]
fn unwritable_output_stops_the_encoder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = JsonBackend::new().with_unwritable_prefix("locked");
    let result = EncodeSession::open(&backend, config(30), &dir.path().join("locked.mp4"), POLL);

    assert!(matches!(result, Err(ReelError::VideoEncodeError(_))));
    assert_eq!(backend.codecs_stopped(), 1);
}
