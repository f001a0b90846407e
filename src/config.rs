use std::{path::PathBuf, time::Duration};

use crate::model_download::{
    DEFAULT_MODEL_DIR, HANDPOSE_ESTIMATOR_MODEL_FILENAME, PALM_DETECTOR_MODEL_FILENAME,
};

pub const MODEL_DIR_ENV: &str = "NAILFEED_MODEL_DIR";

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    pub max_hands: usize,
    pub model_complexity: u8,
    /// Palm detector score threshold.
    pub min_detection_confidence: f32,
    /// Minimum hand presence score reported by the landmark model.
    pub min_tracking_confidence: f32,
    pub init_timeout: Duration,
    pub detect_timeout: Duration,
    pub handpose_model_path: PathBuf,
    pub palm_model_path: PathBuf,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::with_model_dir(PathBuf::from(DEFAULT_MODEL_DIR))
    }
}

impl DetectorConfig {
    pub fn with_model_dir(dir: PathBuf) -> Self {
        Self {
            max_hands: 1,
            model_complexity: 1,
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
            // First initialization may include downloading both models.
            init_timeout: Duration::from_secs(120),
            detect_timeout: Duration::from_secs(10),
            handpose_model_path: dir.join(HANDPOSE_ESTIMATOR_MODEL_FILENAME),
            palm_model_path: dir.join(PALM_DETECTOR_MODEL_FILENAME),
        }
    }

    /// Defaults, with the model directory taken from `NAILFEED_MODEL_DIR` when set.
    pub fn from_env() -> Self {
        match std::env::var_os(MODEL_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::with_model_dir(PathBuf::from(dir)),
            _ => Self::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TryOnConfig {
    pub detector: DetectorConfig,
    /// Template height is always one and a half times this.
    pub template_width: u32,
    pub fetch_timeout: Duration,
}

impl Default for TryOnConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            template_width: 200,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

impl TryOnConfig {
    pub fn from_env() -> Self {
        Self {
            detector: DetectorConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn template_size(&self) -> (u32, u32) {
        let width = self.template_width.max(2);
        (width, width * 3 / 2)
    }
}
