//! Benchmarks for the per-frame and per-job stages.
//!
//! Run with: cargo bench
//! Run with FFmpeg encoding: cargo bench --features ffmpeg

use std::hint::black_box;

use criterion::Criterion;
use image::{DynamicImage, Rgb, RgbImage};
use reelmaker::{FrameSchedule, RasterFitter, image_to_planar, rgb_to_planar};

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

fn benchmark_color_conversion(criterion: &mut Criterion) {
    let canvas = gradient(1280, 720);
    let raw = canvas.as_raw().clone();

    criterion.bench_function("rgb to planar 4:2:0 (1280x720)", |bencher| {
        bencher.iter(|| rgb_to_planar(black_box(&raw), 1280, 720));
    });

    let small = gradient(640, 480);
    criterion.bench_function("rgb to planar 4:2:0 (640x480)", |bencher| {
        bencher.iter(|| image_to_planar(black_box(&small)));
    });
}

fn benchmark_raster_fit(criterion: &mut Criterion) {
    let fitter = RasterFitter::new(1280, 720).unwrap();

    let full_hd = DynamicImage::ImageRgb8(gradient(1920, 1080));
    criterion.bench_function("fit 1920x1080 onto 1280x720", |bencher| {
        bencher.iter(|| fitter.fit_image(black_box(&full_hd)).unwrap());
    });

    let huge = DynamicImage::ImageRgb8(gradient(6000, 4000));
    criterion.bench_function("fit 6000x4000 onto 1280x720 (pre-reduced)", |bencher| {
        bencher.iter(|| fitter.fit_image(black_box(&huge)).unwrap());
    });

    let portrait = DynamicImage::ImageRgb8(gradient(1080, 1920));
    criterion.bench_function("fit 1080x1920 onto 1280x720 (pillarbox)", |bencher| {
        bencher.iter(|| fitter.fit_image(black_box(&portrait)).unwrap());
    });
}

fn benchmark_schedule(criterion: &mut Criterion) {
    criterion.bench_function("schedule 50 images over 60 s", |bencher| {
        bencher.iter(|| {
            let schedule = FrameSchedule::build(black_box(50), 30, 60).unwrap();
            (0..schedule.total_frames())
                .filter_map(|frame| schedule.source_for_frame(frame))
                .count()
        });
    });
}

#[cfg(feature = "ffmpeg")]
fn benchmark_encoding(criterion: &mut Criterion) {
    use reelmaker::{FfmpegBackend, FfmpegLogLevel, VideoJob, VideoMaker, VideoMakerOptions};

    reelmaker::set_ffmpeg_log_level(FfmpegLogLevel::Error);

    let backend = match FfmpegBackend::new() {
        Ok(backend) => backend,
        Err(error) => {
            eprintln!("Skipping benchmark: {error}");
            return;
        }
    };
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("frame.png");
    gradient(1920, 1080).save(&image).unwrap();
    let output = dir.path().join("bench.mp4");

    let maker = VideoMaker::with_options(
        backend,
        VideoMakerOptions::new().with_temp_dir(dir.path()),
    );
    let job = VideoJob::new([&image], 2).with_output(&output);
    if let Err(error) = maker.make(&job) {
        eprintln!("Skipping benchmark: {error}");
        return;
    }

    let mut group = criterion.benchmark_group("ffmpeg");
    group.sample_size(10);
    group.bench_function("encode one image for 2 s", |bencher| {
        bencher.iter(|| maker.make(&job).unwrap());
    });
    group.finish();
}

#[cfg(not(feature = "ffmpeg"))]
fn benchmark_encoding(_criterion: &mut Criterion) {}

criterion::criterion_group!(
    benches,
    benchmark_color_conversion,
    benchmark_raster_fit,
    benchmark_schedule,
    benchmark_encoding,
);
criterion::criterion_main!(benches);
