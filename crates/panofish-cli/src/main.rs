use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use panofish_cli::PanoramaProcessor;
use panofish_cli::types::ProcessingConfig;

#[derive(Parser)]
#[command(name = "panofish")]
#[command(about = "Stitch synchronised fisheye image sequences into panorama frames")]
#[command(version)]
struct Cli {
    /// YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image directory of one camera; repeat left to right. Overrides the config.
    #[arg(long = "input")]
    inputs: Vec<PathBuf>,

    /// Output directory for frames and report.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Maximum number of frames to process.
    #[arg(long)]
    max_frames: Option<usize>,

    /// First frame to read from every camera.
    #[arg(long)]
    start_frame: Option<usize>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    if let Err(err) = run(cli) {
        error!("{err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ProcessingConfig::from_yaml_file(path)?,
        None => ProcessingConfig::default(),
    };
    if !cli.inputs.is_empty() {
        config.inputs = cli.inputs;
    }
    if let Some(output) = cli.output {
        config.output_dir = output;
    }
    if let Some(max) = cli.max_frames {
        config.max_frames = Some(max);
    }
    if let Some(start) = cli.start_frame {
        config.start_frame = start;
    }

    let processor = PanoramaProcessor::new(config)?;
    let output = processor.process_session()?;
    info!(
        "{} frames delivered, {} dropped, {} flagged for review",
        output.summary.delivered_frames,
        output.summary.dropped_frames,
        output.summary.review_frames
    );
    Ok(())
}
