//! detect_file - run one image through the relay pipeline
//!
//! Prints the JSON message a connected client would receive for the image.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use hazard_relay::{open_backend, BackendKind, FramePipeline, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JPEG or PNG image.
    image: PathBuf,
    /// JSON or TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// ONNX model path.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Detector backend: tract or stub.
    #[arg(long)]
    backend: Option<BackendKind>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let mut config = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    if let Some(backend) = args.backend {
        config.detector.backend = backend;
    }
    config.pipeline.infer_every = 1;
    config.pipeline.send_empty = true;
    config.validate()?;

    let bytes = std::fs::read(&args.image)
        .with_context(|| format!("failed to read image {}", args.image.display()))?;
    let pipeline = FramePipeline::new(open_backend(&config.detector)?, config.pipeline.clone());
    let mut ctx = pipeline.new_context();
    let response = pipeline
        .process_bytes(&mut ctx, &bytes)?
        .unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
