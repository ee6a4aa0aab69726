use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_PATH: &str = "/ws";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
/// YOLO input sides are multiples of the largest feature-map stride.
const MODEL_STRIDE: u32 = 32;
const DEFAULT_MODEL_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
const DEFAULT_MAX_DETECTIONS: usize = 300;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.75;
const DEFAULT_HAZARD_CLASSES: [&str; 4] = ["person", "car", "bus", "bicycle"];
const DEFAULT_DISPLAY_WIDTH: u32 = 320;
const DEFAULT_DISPLAY_HEIGHT: u32 = 240;

pub const CONFIG_ENV: &str = "HAZARD_RELAY_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    addr: Option<String>,
    path: Option<String>,
    max_connections: Option<usize>,
    detector: Option<DetectorConfigFile>,
    pipeline: Option<PipelineConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
    model_confidence: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    confidence_threshold: Option<f32>,
    hazard_classes: Option<Vec<String>>,
    display_width: Option<u32>,
    display_height: Option<u32>,
    mirror: Option<bool>,
    infer_every: Option<u32>,
    send_empty: Option<bool>,
    hazards_only: Option<bool>,
}

/// Which detector implementation serves inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Tract,
    Stub,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected 'tract' or 'stub'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub addr: String,
    /// WebSocket endpoint path.
    pub path: String,
    /// Concurrent connection cap; `None` is unlimited.
    pub max_connections: Option<usize>,
    pub detector: DetectorSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub labels_path: Option<PathBuf>,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Model-level candidate floor, applied before NMS.
    pub model_confidence: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Detections scoring below this never reach the client.
    pub confidence_threshold: f32,
    pub hazard_classes: Vec<String>,
    pub display_width: u32,
    pub display_height: u32,
    /// Flip boxes horizontally for a mirrored front-end.
    pub mirror: bool,
    /// Run inference on every n-th decoded frame only.
    pub infer_every: u32,
    /// Send a response even when it has no boxes and no alerts.
    pub send_empty: bool,
    /// Only report boxes of hazard classes.
    pub hazards_only: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Tract,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            model_confidence: DEFAULT_MODEL_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            hazard_classes: DEFAULT_HAZARD_CLASSES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            display_width: DEFAULT_DISPLAY_WIDTH,
            display_height: DEFAULT_DISPLAY_HEIGHT,
            mirror: true,
            infer_every: 1,
            send_empty: true,
            hazards_only: false,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            path: DEFAULT_PATH.to_string(),
            max_connections: None,
            detector: DetectorSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Load from the file named by `HAZARD_RELAY_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => read_config_file(path)?,
            None => RelayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let detector_file = file.detector.unwrap_or_default();
        let pipeline_file = file.pipeline.unwrap_or_default();

        let backend = match detector_file.backend.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.detector.backend,
        };
        let detector = DetectorSettings {
            backend,
            model_path: detector_file
                .model_path
                .unwrap_or(defaults.detector.model_path),
            labels_path: detector_file.labels_path,
            input_size: detector_file
                .input_size
                .unwrap_or(defaults.detector.input_size),
            model_confidence: detector_file
                .model_confidence
                .unwrap_or(defaults.detector.model_confidence),
            iou_threshold: detector_file
                .iou_threshold
                .unwrap_or(defaults.detector.iou_threshold),
            max_detections: detector_file
                .max_detections
                .unwrap_or(defaults.detector.max_detections),
        };
        let pipeline = PipelineSettings {
            confidence_threshold: pipeline_file
                .confidence_threshold
                .unwrap_or(defaults.pipeline.confidence_threshold),
            hazard_classes: pipeline_file
                .hazard_classes
                .unwrap_or(defaults.pipeline.hazard_classes),
            display_width: pipeline_file
                .display_width
                .unwrap_or(defaults.pipeline.display_width),
            display_height: pipeline_file
                .display_height
                .unwrap_or(defaults.pipeline.display_height),
            mirror: pipeline_file.mirror.unwrap_or(defaults.pipeline.mirror),
            infer_every: pipeline_file
                .infer_every
                .unwrap_or(defaults.pipeline.infer_every),
            send_empty: pipeline_file
                .send_empty
                .unwrap_or(defaults.pipeline.send_empty),
            hazards_only: pipeline_file
                .hazards_only
                .unwrap_or(defaults.pipeline.hazards_only),
        };
        Ok(Self {
            addr: file.addr.unwrap_or(defaults.addr),
            path: file.path.unwrap_or(defaults.path),
            max_connections: file.max_connections,
            detector,
            pipeline,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("HAZARD_RELAY_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(model) = std::env::var("HAZARD_RELAY_MODEL") {
            if !model.trim().is_empty() {
                self.detector.model_path = PathBuf::from(model);
            }
        }
        if let Ok(backend) = std::env::var("HAZARD_RELAY_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.parse()?;
            }
        }
        if let Ok(confidence) = std::env::var("HAZARD_RELAY_CONFIDENCE") {
            self.pipeline.confidence_threshold = confidence.trim().parse().map_err(|_| {
                anyhow!("HAZARD_RELAY_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Ok(classes) = std::env::var("HAZARD_RELAY_HAZARD_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.pipeline.hazard_classes = parsed;
            }
        }
        Ok(())
    }

    /// Check cross-field constraints. Called by `load`; call again after
    /// applying command-line overrides.
    pub fn validate(&mut self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(anyhow!("endpoint path '{}' must start with '/'", self.path));
        }
        if self.max_connections == Some(0) {
            return Err(anyhow!("max_connections must be greater than zero"));
        }
        check_unit("confidence threshold", self.pipeline.confidence_threshold)?;
        check_unit("model confidence", self.detector.model_confidence)?;
        check_unit("iou threshold", self.detector.iou_threshold)?;
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if self.detector.input_size % MODEL_STRIDE != 0 {
            return Err(anyhow!(
                "detector input_size must be a multiple of {}, got {}",
                MODEL_STRIDE,
                self.detector.input_size
            ));
        }
        if self.detector.max_detections == 0 {
            return Err(anyhow!("detector max_detections must be greater than zero"));
        }
        if self.pipeline.display_width == 0 || self.pipeline.display_height == 0 {
            return Err(anyhow!("display size must be greater than zero"));
        }
        if self.pipeline.infer_every == 0 {
            return Err(anyhow!("infer_every must be at least 1"));
        }
        let mut seen = HashSet::new();
        self.pipeline.hazard_classes = self
            .pipeline
            .hazard_classes
            .iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect();
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
