use super::{error_response, runs::run_file_url};
use crate::{
    detection::Detection,
    pipeline::{PipelineError, PipelineOutput},
    run_folder::RunFolderError,
    server::SharedState,
    upload::{UploadError, UploadedImage},
};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;
use yolo_prediction::ModelService;

const ROUTE: &str = "/api/predict";

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictImageError::Pipeline(PipelineError::RunFolder(RunFolderError::NotFound)) => {
                tracing::warn!("{}", self);
                return error_response(StatusCode::NOT_FOUND, self.to_string());
            }
            PredictImageError::Upload(UploadError::UnsupportedExtension(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            PredictImageError::Upload(UploadError::Multipart { status, .. }) => *status,
            PredictImageError::Upload(UploadError::Task(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            PredictImageError::Upload(_) => StatusCode::BAD_REQUEST,
            PredictImageError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!("Prediction request failed: {}", self);
        } else {
            tracing::warn!("Rejected upload: {}", self);
        }
        error_response(status, format!("Something went wrong: {}", self))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PredictResponse {
    pub run: String,
    pub annotated_image: Option<String>,
    pub detections: Vec<Detection>,
    pub document: String,
}

impl From<PipelineOutput> for PredictResponse {
    fn from(output: PipelineOutput) -> Self {
        let run = output.run_folder.name().to_string();
        Self {
            annotated_image: output
                .annotated_image
                .map(|file_name| run_file_url(&run, &file_name)),
            run,
            detections: output.detections,
            document: output.document,
        }
    }
}

#[instrument(skip(state, multipart))]
pub async fn predict_image<M: ModelService>(
    State(state): State<SharedState<M>>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, PredictImageError> {
    state.metrics.record_request(ROUTE);

    let upload = UploadedImage::from_multipart(&mut multipart).await?;

    let start = Instant::now();
    let output = state.pipeline.process(upload).await;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, ROUTE);

    let output = output?;
    state.metrics.record_detections(output.detections.len());

    Ok(Json(PredictResponse::from(output)))
}
