use std::{cmp::Ordering, path::Path};

use anyhow::{Context, Result, anyhow};
use image::RgbaImage;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    LandmarkEngine,
    common::{self, HANDPOSE_INPUT_SIZE},
    palm::{PalmDetector, PalmDetectorConfig, crop_from_palm},
};
use crate::{
    config::DetectorConfig,
    model_download::{ModelKind, ensure_model_ready},
    types::Hand,
};

/// Two-stage MediaPipe-style hand detector on ONNX Runtime: palm boxes
/// first, then 21 landmarks inside a rotated crop around each palm.
pub struct OrtEngine {
    handpose: Session,
    palm_detector: PalmDetector,
    max_hands: usize,
    min_presence: f32,
}

impl OrtEngine {
    /// Fetches missing model files, then opens both sessions.
    pub fn load(cfg: &DetectorConfig) -> Result<Self> {
        ensure_model_ready(ModelKind::HandposeEstimator, &cfg.handpose_model_path, |_evt| {})?;
        ensure_model_ready(ModelKind::PalmDetector, &cfg.palm_model_path, |_evt| {})?;
        Self::new(cfg)
    }

    pub fn new(cfg: &DetectorConfig) -> Result<Self> {
        let handpose = open_session(&cfg.handpose_model_path)?;
        let palm_detector = PalmDetector::new(
            &cfg.palm_model_path,
            PalmDetectorConfig {
                score_threshold: cfg.min_detection_confidence,
                ..PalmDetectorConfig::default()
            },
        )?;

        log::info!(
            "handpose ORT backend ready using {} and palm detector {} (complexity {})",
            cfg.handpose_model_path.display(),
            cfg.palm_model_path.display(),
            cfg.model_complexity
        );

        Ok(Self {
            handpose,
            palm_detector,
            max_hands: cfg.max_hands.max(1),
            min_presence: cfg.min_tracking_confidence,
        })
    }

    fn infer_hand(&mut self, image: &RgbaImage, center: (f32, f32), side: f32, angle: f32) -> Result<Option<Hand>> {
        let (input, transform) =
            common::prepare_rotated_crop(image, center, side, angle, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 1 {
            return Err(anyhow!("model returned no outputs"));
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_landmarks(&flattened)?;

        let presence = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        };
        if presence < self.min_presence {
            log::debug!("dropping hand with presence {presence:.3}");
            return Ok(None);
        }

        transform.to_hand(&landmarks).map(Some)
    }
}

impl LandmarkEngine for OrtEngine {
    fn detect(&mut self, image: &RgbaImage) -> Result<Vec<Hand>> {
        let mut palms = self.palm_detector.detect(image)?;
        palms.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        palms.truncate(self.max_hands);

        let mut hands = Vec::with_capacity(palms.len());
        for palm in &palms {
            let (center, side, angle) = crop_from_palm(palm);
            if let Some(hand) = self.infer_hand(image, center, side, angle)? {
                hands.push(hand);
            }
        }
        Ok(hands)
    }
}

fn open_session(model_path: &Path) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(2)?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;
    Ok(session)
}
