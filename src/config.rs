use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use facecam_vision::{DetectorSettings, Dimensions};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::frame_loop::{Cadence, FailurePolicy, LoopSettings};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACECAM_CONFIG_PATH").unwrap_or("/usr/local/etc/facecam/config.toml"))
});

pub static DEFAULT_MODEL_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(dir) = option_env!("FACECAM_MODEL_DIR") {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("", "", "facecam")
        .map(|dirs| dirs.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("/usr/local/share/facecam/models"))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CadenceKind {
    FrameSynced,
    FixedInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    Stop,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub model_dir: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub expression_min_confidence: f32,
    pub cadence: CadenceKind,
    pub interval_ms: u64,
    pub idle_poll_ms: u64,
    pub display: Option<DisplaySize>,
    pub on_failure: OnFailure,
    pub max_consecutive_failures: u32,
    pub output: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            model_dir: DEFAULT_MODEL_DIR.clone(),
            score_threshold: 0.6,
            nms_threshold: 0.3,
            expression_min_confidence: 0.05,
            cadence: CadenceKind::FrameSynced,
            interval_ms: 100,
            idle_poll_ms: 50,
            display: None,
            on_failure: OnFailure::Stop,
            max_consecutive_failures: 5,
            output: std::env::temp_dir().join("facecam-overlay.png"),
        }
    }
}

impl Config {
    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            cadence: match self.cadence {
                CadenceKind::FrameSynced => Cadence::FrameSynced,
                CadenceKind::FixedInterval => {
                    Cadence::FixedInterval(Duration::from_millis(self.interval_ms))
                }
            },
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            display: self.display.map(|d| Dimensions::new(d.width, d.height)),
            min_expression_confidence: self.expression_min_confidence,
            on_failure: match self.on_failure {
                OnFailure::Stop => FailurePolicy::Stop,
                OnFailure::Skip => FailurePolicy::Skip {
                    max_consecutive: self.max_consecutive_failures,
                },
            },
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(*CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}
