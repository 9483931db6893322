use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidingest::{print_summary, Config, Pipeline};

#[derive(Parser)]
#[command(name = "vidingest")]
#[command(version, about = "Sample frames and transcribe the audio of a video")]
#[command(long_about = "Samples frames from a video at a fixed rate, splits its audio track at silences, \
classifies each chunk as silence, music or speech, and transcribes the speech with OpenAI Whisper.")]
struct Cli {
    /// Input video file
    input: PathBuf,

    /// Frames to keep per second of video
    #[arg(long)]
    fps: Option<u32>,

    /// Directory under which frames/<id> and audio/<id> are written
    #[arg(short, long)]
    output_root: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(fps) = cli.fps {
        config.frames_per_second = fps;
    }
    if let Some(ref root) = cli.output_root {
        config.output_root = root.clone();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    config
        .validate(true)
        .context("Configuration validation failed")?;

    info!("Input:       {}", cli.input.display());
    info!("Output root: {}", config.output_root.display());
    info!("Frame rate:  {} fps", config.frames_per_second);

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, stopping after the current step");
            cancelled.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let mut pipeline = Pipeline::from_config(&config).context("Failed to build pipeline")?;
    if cli.no_progress {
        pipeline = pipeline.without_progress();
    }

    let report = pipeline
        .ingest_video(&cli.input, cancelled)
        .await
        .with_context(|| format!("Failed to ingest {}", cli.input.display()))?;

    print_summary(&report);
    Ok(())
}
