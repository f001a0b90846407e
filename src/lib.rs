pub mod compositor;
pub mod config;
pub mod error;
pub mod landmarks;
pub mod model_download;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod regions;
pub mod share;
pub mod template;
pub mod types;

pub use config::{DetectorConfig, TryOnConfig};
pub use error::{LoadError, TryOnError};
pub use landmarks::{DetectorHandle, EngineFactory, LandmarkEngine};
pub use pipeline::{CompositeResult, NailTryOn};
pub use raster::{DefaultLoader, ImageLoader, ImageSource};
pub use types::{DetectionOutcome, Finger, Hand, HandLandmark, NailRegion};
