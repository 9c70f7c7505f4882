use crate::bounding_box::BoundingBoxWithLabels;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::instrument;
use yolo_prediction::{ColorLabel, ImageFrame, ModelService, PredictionBatch, PredictionError};

/// Model output joined with the class label table.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub batch: PredictionBatch,
    pub labeled: Vec<BoundingBoxWithLabels>,
}

pub struct PredictionService<M: ModelService> {
    model_service: M,
    class_labels: Vec<ColorLabel>,
}

impl<M: ModelService> PredictionService<M> {
    pub fn new(model_service: M, class_labels: Vec<ColorLabel>) -> Self {
        Self {
            model_service,
            class_labels,
        }
    }

    #[instrument(skip(self, image_data))]
    pub async fn predict(&self, image_data: Vec<u8>) -> Result<Prediction, PredictionError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        let batch = self
            .model_service
            .predict(ImageFrame {
                image_data,
                timestamp,
            })
            .await?;

        let labeled = batch
            .detections
            .iter()
            .map(|bbox| {
                BoundingBoxWithLabels::new(bbox, self.class_labels.get(bbox.class_id as usize))
            })
            .collect();

        Ok(Prediction { batch, labeled })
    }
}
