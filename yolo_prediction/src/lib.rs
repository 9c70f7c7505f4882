mod model_service;
mod ort_service;
mod prediction;
mod state;

pub mod config;

pub use async_trait::async_trait;
pub use model_service::{ModelService, PredictionError};
pub use ort_service::{non_max_suppression, OrtModelService, OutputDecoder};
pub use prediction::{BoundingBox, ColorLabel, ImageFrame, PredictionBatch};
pub use state::{load_yolov8_labels, ServiceState, State};
