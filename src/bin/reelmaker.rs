use std::{path::PathBuf, sync::Arc};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use reelmaker::{
    AudioAdjustment, AudioOutcome, EncoderProfile, FfmpegBackend, FfmpegLogLevel, FrameSchedule,
    JobOutput, OperationType, ProgressCallback, ProgressInfo, VideoJob, VideoMaker,
    VideoMakerOptions,
};

const CLI_AFTER_HELP: &str = "Examples:\n  reelmaker make cover.jpg --duration 5 --out cover.mp4\n  reelmaker make a.jpg b.jpg c.jpg --duration 10 --audio song.mp3 --progress\n  reelmaker schedule --images 3 --duration 10 --json\n  reelmaker completions zsh > _reelmaker";

#[derive(Debug, Parser)]
#[command(
    name = "reelmaker",
    version,
    about = "Turn still images and an optional soundtrack into MP4 videos",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show additional output.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// FFmpeg log level (quiet, error, warning, info, debug, trace).
    #[arg(long)]
    log_level: Option<FfmpegLogLevel>,

    /// Directory for intermediate files.
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a video from one or more images.
    #[command(
        about = "Build a video",
        after_help = "Examples:\n  reelmaker make cover.jpg --duration 5\n  reelmaker make a.jpg b.jpg --duration 8 --audio song.m4a --out reel.mp4 --json"
    )]
    Make {
        /// Source images, shown in order.
        #[arg(required = true)]
        images: Vec<String>,
        /// Duration in whole seconds.
        #[arg(long, default_value_t = 5)]
        duration: u32,
        /// Optional soundtrack.
        #[arg(long)]
        audio: Option<String>,
        /// Output file path. Generated when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Frames per second.
        #[arg(long)]
        fps: Option<u32>,
        /// Target video bit rate in bits per second.
        #[arg(long)]
        bit_rate: Option<u64>,
        /// Print the result as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print how frames would be distributed across images.
    #[command(about = "Show the frame schedule")]
    Schedule {
        #[arg(long)]
        images: usize,
        #[arg(long, default_value_t = 5)]
        duration: u32,
        #[arg(long, default_value_t = 30)]
        fps: u32,
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn operation_label(operation: OperationType) -> &'static str {
    match operation {
        OperationType::VideoEncoding => "encoding video",
        OperationType::AudioTranscoding => "transcoding audio",
        OperationType::AudioLooping => "fitting audio",
        OperationType::Merging => "merging",
        _ => "working",
    }
}

fn describe_audio(outcome: &AudioOutcome) -> String {
    match outcome {
        AudioOutcome::NotRequested => "none".to_string(),
        AudioOutcome::Included { adjustment } => match adjustment {
            AudioAdjustment::Looped { loops } => format!("looped {loops}x"),
            AudioAdjustment::Trimmed => "trimmed".to_string(),
            AudioAdjustment::PassThrough => "unchanged".to_string(),
        },
        AudioOutcome::Dropped { reason } => format!("dropped ({reason})"),
    }
}

fn job_json(output: &JobOutput) -> serde_json::Value {
    json!({
        "path": output.path.display().to_string(),
        "width": output.canvas.0,
        "height": output.canvas.1,
        "frames": output.video_frames,
        "frame_rate": output.schedule.frame_rate(),
        "duration_us": output.schedule.duration_us(),
        "frames_per_image": output.schedule.frame_counts(),
        "audio": match &output.audio {
            AudioOutcome::NotRequested => json!(null),
            AudioOutcome::Included { .. } => json!({
                "included": true,
                "adjustment": describe_audio(&output.audio),
            }),
            AudioOutcome::Dropped { reason } => json!({
                "included": false,
                "reason": reason,
            }),
        },
    })
}

fn apply_global_options(global: &GlobalOptions) {
    if let Some(level) = global.log_level {
        reelmaker::set_ffmpeg_log_level(level);
    }
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}",
        )?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        self.bar.set_message(operation_label(info.operation));
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global);

    match cli.command {
        Commands::Make {
            images,
            duration,
            audio,
            out,
            fps,
            bit_rate,
            json,
        } => {
            let mut profile = EncoderProfile::default();
            if let Some(fps) = fps {
                if fps == 0 {
                    return Err("--fps must be greater than 0".into());
                }
                profile = profile.with_frame_rate(fps);
            }
            if let Some(bit_rate) = bit_rate {
                profile = profile.with_bit_rate(bit_rate);
            }

            let mut options = VideoMakerOptions::new().with_encoder_profile(profile);
            if let Some(temp_dir) = &cli.global.temp_dir {
                options = options.with_temp_dir(temp_dir.clone());
            }
            let progress = if cli.global.progress && !json {
                let progress = Arc::new(TerminalProgress::new()?);
                options = options.with_progress(progress.clone());
                Some(progress)
            } else {
                None
            };

            let mut job = VideoJob::new(&images, duration);
            if let Some(audio) = &audio {
                job = job.with_audio(audio);
            }
            if let Some(out) = &out {
                job = job.with_output(out);
            }

            if cli.global.verbose {
                eprintln!(
                    "{} {} image(s), {duration}s, audio: {}",
                    "job".cyan().bold(),
                    images.len(),
                    audio.as_deref().unwrap_or("none")
                );
            }

            let maker = VideoMaker::with_options(FfmpegBackend::new()?, options);
            let output = maker.make(&job)?;
            if let Some(progress) = progress {
                progress.bar.finish_and_clear();
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&job_json(&output))?);
            } else {
                if let AudioOutcome::Dropped { reason } = &output.audio {
                    eprintln!(
                        "{} {}",
                        "warning:".yellow().bold(),
                        format!("audio left out: {reason}").yellow()
                    );
                }
                println!("{} {}", "wrote".green().bold(), output.path.display());
                println!(
                    "Video: {}x{} @ {} fps, {} frames",
                    output.canvas.0,
                    output.canvas.1,
                    output.schedule.frame_rate(),
                    output.video_frames
                );
                println!("Audio: {}", describe_audio(&output.audio));
                if cli.global.verbose {
                    println!("Frames per image: {:?}", output.schedule.frame_counts());
                }
            }
        }
        Commands::Schedule {
            images,
            duration,
            fps,
            json,
        } => {
            let schedule = FrameSchedule::build(images, fps, duration)?;
            if json {
                let payload = json!({
                    "frame_rate": schedule.frame_rate(),
                    "total_frames": schedule.total_frames(),
                    "duration_us": schedule.duration_us(),
                    "last_presentation_time_us": schedule.last_presentation_time_us(),
                    "frames_per_image": schedule.frame_counts(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "Total: {} frames @ {} fps ({} us)",
                    schedule.total_frames(),
                    schedule.frame_rate(),
                    schedule.duration_us()
                );
                for (index, count) in schedule.frame_counts().iter().enumerate() {
                    println!("  image {index}: {count} frames");
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "reelmaker", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
