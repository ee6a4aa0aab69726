//! hazard_relayd - frame detection relay daemon
//!
//! This daemon:
//! 1. Loads layered configuration (file, environment, flags)
//! 2. Loads the detector model once
//! 3. Serves the WebSocket endpoint, one thread per connection
//! 4. Runs until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use hazard_relay::{
    config::CONFIG_ENV, open_backend, ApiConfig, BackendKind, FramePipeline, RelayConfig,
    StreamServer,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
    /// Listen address, e.g. 0.0.0.0:8000.
    #[arg(long)]
    addr: Option<String>,
    /// ONNX model path.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Detector backend: tract or stub.
    #[arg(long)]
    backend: Option<BackendKind>,
    /// Minimum confidence for reported boxes.
    #[arg(long)]
    confidence: Option<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = RelayConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }
    if let Some(backend) = args.backend {
        config.detector.backend = backend;
    }
    if let Some(confidence) = args.confidence {
        config.pipeline.confidence_threshold = confidence;
    }
    config.validate()?;

    log::info!(
        "loading {:?} detector (model {})",
        config.detector.backend,
        config.detector.model_path.display()
    );
    let detector = open_backend(&config.detector)?;
    let pipeline = Arc::new(FramePipeline::new(detector, config.pipeline.clone()));
    let settings = pipeline.settings();
    log::info!(
        "{} detector ready: confidence threshold {}, hazard classes [{}], display {}x{}",
        pipeline.detector_name(),
        settings.confidence_threshold,
        settings.hazard_classes.join(", "),
        settings.display_width,
        settings.display_height
    );

    let handle = StreamServer::new(ApiConfig::from(&config), pipeline).spawn()?;
    log::info!("listening on ws://{}{}", handle.addr, config.path);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let _ = rx.recv();
    log::info!(
        "shutdown signal received, closing {} connections...",
        handle.active_connections()
    );
    handle.stop()?;

    Ok(())
}
