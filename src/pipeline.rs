use std::{sync::Arc, thread};

use image::RgbaImage;

use crate::{
    compositor,
    config::TryOnConfig,
    error::TryOnError,
    landmarks::DetectorHandle,
    raster::{self, DefaultLoader, ImageLoader, ImageSource},
    regions::{estimate_fallback_regions, extract_nail_regions},
    template::DesignTemplate,
    types::{DetectionOutcome, NailRegion},
};

/// A finished try-on image.
#[derive(Clone, Debug)]
pub struct CompositeResult {
    image: RgbaImage,
    regions: Vec<NailRegion>,
}

impl CompositeResult {
    pub fn new(image: RgbaImage, regions: Vec<NailRegion>) -> Self {
        Self { image, regions }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Where the design was placed, thumb first.
    pub fn regions(&self) -> &[NailRegion] {
        &self.regions
    }

    pub fn to_png(&self) -> Result<Vec<u8>, TryOnError> {
        raster::encode_png(&self.image).map_err(TryOnError::Encode)
    }

    pub fn to_data_url(&self) -> Result<String, TryOnError> {
        raster::to_png_data_url(&self.image).map_err(TryOnError::Encode)
    }
}

pub struct NailTryOn {
    config: TryOnConfig,
    detector: Arc<DetectorHandle>,
    loader: Box<dyn ImageLoader>,
}

impl NailTryOn {
    /// Uses the process-wide detector and the default loader.
    pub fn new(config: TryOnConfig) -> Self {
        let loader = DefaultLoader::new(config.fetch_timeout);
        Self::with_parts(config, DetectorHandle::shared(), Box::new(loader))
    }

    pub fn with_parts(
        config: TryOnConfig,
        detector: Arc<DetectorHandle>,
        loader: Box<dyn ImageLoader>,
    ) -> Self {
        Self {
            config,
            detector,
            loader,
        }
    }

    pub fn detector(&self) -> &Arc<DetectorHandle> {
        &self.detector
    }

    /// Paints the design onto each fingernail of the hand photo.
    ///
    /// Detector trouble of any kind falls back to heuristic placement and is
    /// never reported. Only an unloadable hand or design photo is an error.
    pub fn apply_nail_design(
        &self,
        hand: &ImageSource,
        design: &ImageSource,
    ) -> Result<CompositeResult, TryOnError> {
        // Both photos load concurrently; detection only starts once both
        // are known to be usable.
        let (photo, template) = thread::scope(|scope| {
            let template = scope.spawn(|| -> Result<DesignTemplate, TryOnError> {
                let design = self.loader.load(design).map_err(TryOnError::DesignPhoto)?;
                let (width, height) = self.config.template_size();
                Ok(DesignTemplate::build(&design, width, height))
            });
            let photo = self.loader.load(hand).map_err(TryOnError::HandPhoto);
            let template = template
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (photo, template)
        });
        let photo = Arc::new(photo?);
        let template = template?;

        let regions = self.place_nails(&photo);
        let image = compositor::composite(&photo, &regions, &template);
        Ok(CompositeResult { image, regions })
    }

    /// Like [`apply_nail_design`](Self::apply_nail_design), encoded as a PNG data URL.
    pub fn apply_nail_design_data_url(
        &self,
        hand: &ImageSource,
        design: &ImageSource,
    ) -> Result<String, TryOnError> {
        self.apply_nail_design(hand, design)?.to_data_url()
    }

    fn place_nails(&self, photo: &Arc<RgbaImage>) -> Vec<NailRegion> {
        let (width, height) = photo.dimensions();

        let outcome = if self.detector.initialize() {
            self.detector.detect(Arc::clone(photo))
        } else {
            DetectionOutcome::Unavailable("detector failed to initialize".to_string())
        };

        match outcome {
            DetectionOutcome::Detected(hands) if !hands.is_empty() => {
                if hands.len() > 1 {
                    log::debug!("{} hands detected, using the first", hands.len());
                }
                log::info!("placing nails from detected hand landmarks");
                extract_nail_regions(&hands[0], width, height)
            }
            DetectionOutcome::Detected(_) | DetectionOutcome::NotFound => {
                log::info!("no hand found, placing nails heuristically");
                estimate_fallback_regions(width, height)
            }
            DetectionOutcome::Unavailable(reason) => {
                log::info!("hand detector unavailable ({reason}), placing nails heuristically");
                estimate_fallback_regions(width, height)
            }
        }
    }
}
