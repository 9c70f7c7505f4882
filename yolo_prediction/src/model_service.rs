use crate::prediction::{ImageFrame, PredictionBatch};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Model unavailable: {0}")]
    ModelNotFound(String),
    #[error("Image transformation error: {0}")]
    ImageTransform(String),
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("Session mutex poisoned: {0}")]
    SessionPoisoned(String),
    #[error("Invalid model output: {0}")]
    InvalidOutput(String),
    #[error("Inference task failed: {0}")]
    TaskFailed(String),
}

#[async_trait]
pub trait ModelService: Send + Sync + Clone + 'static {
    async fn predict(&self, frame: ImageFrame) -> Result<PredictionBatch, PredictionError>;
}
