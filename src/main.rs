use std::env;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facecam::config::{self, Config};
use facecam::frame_loop::{CancelToken, FrameLoop, LoopReport};
use facecam::overlay::ImageOverlay;
use facecam::source::ImageSequence;
use facecam::startup;
use facecam::ModelKind;
use facecam_vision::{Camera, OrtModelLoader};
use log::info;

#[derive(Parser)]
#[command(name = "facecam")]
#[command(version, about = "Live face detection overlay for webcams and image sequences")]
struct Cli {
    /// Config file (defaults to the system config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the overlay on the configured camera
    Run {
        /// Stop after this many seconds (runs until killed otherwise)
        #[arg(short, long)]
        duration: Option<u64>,
        /// Overlay image to keep updated (overrides the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Annotate every image in a directory
    Annotate {
        /// Directory of input frames
        input: PathBuf,
        /// Directory for annotated frames
        #[arg(short, long, default_value = "annotated")]
        output: PathBuf,
    },
    /// List the required models and whether they are installed
    Models,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { duration, output } => run(&cfg, duration, output),
        Commands::Annotate { input, output } => annotate(&cfg, input, output),
        Commands::Models => models(&cfg),
        Commands::Config => open_config(cli.config),
    }
}

fn run(cfg: &Config, duration: Option<u64>, output: Option<PathBuf>) -> Result<()> {
    info!("Models: {}", cfg.model_dir.display());
    info!("Opening camera: {}", cfg.camera);

    let loader = OrtModelLoader::new(&cfg.model_dir, cfg.detector_settings());
    let (pipeline, camera) = startup::initialize(loader, || Camera::open(&cfg.camera))
        .context("Failed to start face overlay")?;

    let output = output.unwrap_or_else(|| cfg.output.clone());
    info!("Writing overlay to {}", output.display());

    let mut frame_loop = FrameLoop::new(
        camera,
        pipeline,
        ImageOverlay::single(output),
        cfg.loop_settings(),
    );
    if let Some(secs) = duration {
        stop_after(frame_loop.cancel_token(), Duration::from_secs(secs));
    } else {
        info!("Press Ctrl+C to stop.");
    }

    let report = frame_loop.run()?;
    summarize(&report);
    Ok(())
}

fn annotate(cfg: &Config, input: PathBuf, output: PathBuf) -> Result<()> {
    let loader = OrtModelLoader::new(&cfg.model_dir, cfg.detector_settings());
    let (pipeline, frames) = startup::initialize(loader, || ImageSequence::open(&input))
        .context("Failed to start annotation")?;
    let total = frames.len();
    let ended = frames.ended_flag();

    let overlay = ImageOverlay::numbered(&output)?;
    let mut frame_loop = FrameLoop::new(frames, pipeline, overlay, cfg.loop_settings());
    let cancel = frame_loop.cancel_token();

    // Cancellation is only observed between iterations, so the last frame is
    // still presented after the sequence reports Ended.
    let poll = Duration::from_millis(cfg.idle_poll_ms.max(1));
    thread::spawn(move || {
        while !ended.load(Ordering::Acquire) && !cancel.is_cancelled() {
            thread::sleep(poll);
        }
        cancel.cancel();
    });

    let report = frame_loop.run()?;
    summarize(&report);
    info!(
        "✓ Annotated {} of {} frame(s) into {}",
        report.frames_rendered,
        total,
        output.display()
    );
    Ok(())
}

fn models(cfg: &Config) -> Result<()> {
    info!("Model directory: {}", cfg.model_dir.display());
    let mut missing = 0;
    for kind in ModelKind::CANONICAL {
        let path = kind.path_in(&cfg.model_dir);
        if path.is_file() {
            info!("✓ {:<18} {}", kind.to_string(), path.display());
        } else {
            missing += 1;
            info!("✗ {:<18} {} (missing)", kind.to_string(), path.display());
        }
    }
    if missing > 0 {
        anyhow::bail!("{} model file(s) missing", missing);
    }
    Ok(())
}

fn stop_after(cancel: CancelToken, duration: Duration) {
    thread::spawn(move || {
        thread::sleep(duration);
        info!("Duration elapsed, stopping.");
        cancel.cancel();
    });
}

fn summarize(report: &LoopReport) {
    info!(
        "Rendered {} frame(s), {} idle poll(s), {} failure(s)",
        report.frames_rendered, report.idle_polls, report.failures
    );
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.to_path_buf());
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
