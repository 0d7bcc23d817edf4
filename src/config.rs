use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::ingest::SourceConfig;
use crate::pipeline::PipelineSettings;
use crate::stability::DEFAULT_HOLD_SECS;
use crate::storage::SectionKey;

const DEFAULT_SOURCE_URI: &str = "stub://cabin";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_FRAME_STRIDE: u64 = 2;
const DEFAULT_SEATS_PATH: &str = "seat_roi.json";
const DEFAULT_MODEL_PATH: &str = "yolov8n-pose.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.3;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_TRAIN_ID: &str = "1002-9999";
const DEFAULT_CAR_NUMBER: &str = "1";

#[derive(Debug, Deserialize, Default)]
struct OccupancyConfigFile {
    source: Option<SourceConfigFile>,
    seats_path: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    stability: Option<StabilityConfigFile>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    target_fps: Option<u32>,
    frame_stride: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    replay_path: Option<PathBuf>,
    confidence: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilityConfigFile {
    hold_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    db_path: Option<String>,
    train_id: Option<String>,
    car_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Recorded detections from a JSON-lines file.
    Replay,
    /// YOLOv8-pose ONNX model (feature `backend-tract`).
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replay" => Ok(Self::Replay),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}' (expected replay or tract)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OccupancyConfig {
    pub source: SourceSettings,
    pub seats_path: PathBuf,
    pub detector: DetectorSettings,
    pub hold_secs: f64,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub target_fps: u32,
    pub frame_stride: u64,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: PathBuf,
    pub replay_path: Option<PathBuf>,
    pub confidence: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// `None` runs detection-only.
    pub db_path: Option<String>,
    pub train_id: String,
    pub car_number: String,
}

impl OccupancyConfig {
    /// Load from `OCCUPANCY_CONFIG` (if set), then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OCCUPANCY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OccupancyConfigFile) -> Result<Self> {
        let source = file.source.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let store = file.store.unwrap_or_default();

        let backend = match detector.backend.as_deref() {
            Some(name) => name.parse()?,
            None => DetectorKind::Replay,
        };

        Ok(Self {
            source: SourceSettings {
                uri: source
                    .uri
                    .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                frame_stride: source.frame_stride.unwrap_or(DEFAULT_FRAME_STRIDE),
            },
            seats_path: file
                .seats_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SEATS_PATH)),
            detector: DetectorSettings {
                backend,
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                replay_path: detector.replay_path,
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            hold_secs: file
                .stability
                .and_then(|stability| stability.hold_secs)
                .unwrap_or(DEFAULT_HOLD_SECS),
            store: StoreSettings {
                db_path: store.db_path.filter(|path| !path.trim().is_empty()),
                train_id: store
                    .train_id
                    .unwrap_or_else(|| DEFAULT_TRAIN_ID.to_string()),
                car_number: store
                    .car_number
                    .unwrap_or_else(|| DEFAULT_CAR_NUMBER.to_string()),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(uri) = env_string("OCCUPANCY_SOURCE") {
            self.source.uri = uri;
        }
        if let Some(path) = env_string("OCCUPANCY_SEATS") {
            self.seats_path = PathBuf::from(path);
        }
        if let Some(backend) = env_string("OCCUPANCY_DETECTOR") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = env_string("OCCUPANCY_MODEL") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("OCCUPANCY_REPLAY") {
            self.detector.replay_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_string("OCCUPANCY_CONFIDENCE") {
            self.detector.confidence = value
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(value) = env_string("OCCUPANCY_HOLD_SECS") {
            self.hold_secs = value
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_HOLD_SECS must be a number of seconds"))?;
        }
        if let Some(value) = env_string("OCCUPANCY_FRAME_STRIDE") {
            self.source.frame_stride = value
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_FRAME_STRIDE must be a positive integer"))?;
        }
        if let Some(path) = env_string("OCCUPANCY_DB_PATH") {
            self.store.db_path = Some(path);
        }
        if let Some(train_id) = env_string("OCCUPANCY_TRAIN_ID") {
            self.store.train_id = train_id;
        }
        if let Some(car_number) = env_string("OCCUPANCY_CAR_NUMBER") {
            self.store.car_number = car_number;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if !self.hold_secs.is_finite() || self.hold_secs < 0.0 {
            return Err(anyhow!("hold_secs must be a non-negative number of seconds"));
        }
        if self.source.frame_stride == 0 {
            return Err(anyhow!("frame_stride must be at least 1"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!("confidence must be between 0 and 1"));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("detector input_size must be a positive multiple of 32"));
        }
        self.store.train_id = self.store.train_id.trim().to_string();
        self.store.car_number = self.store.car_number.trim().to_string();
        if self.store.train_id.is_empty() || self.store.car_number.is_empty() {
            return Err(anyhow!("train_id and car_number must not be empty"));
        }
        Ok(())
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            uri: self.source.uri.clone(),
            target_fps: self.source.target_fps,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            hold_secs: self.hold_secs,
            frame_stride: self.source.frame_stride,
            confidence: self.detector.confidence,
        }
    }

    pub fn section(&self) -> SectionKey {
        SectionKey::new(self.store.train_id.clone(), self.store.car_number.clone())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<OccupancyConfigFile> {
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
