use super::error_response;
use crate::{run_folder::RunFolderError, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use yolo_prediction::ModelService;

#[derive(Error, Debug)]
pub enum RunLookupError {
    #[error(transparent)]
    RunFolder(#[from] RunFolderError),
    #[error("Background task failed: {0}")]
    Task(String),
}

impl IntoResponse for RunLookupError {
    fn into_response(self) -> Response {
        match &self {
            RunLookupError::RunFolder(RunFolderError::NotFound) => {
                error_response(StatusCode::NOT_FOUND, self.to_string())
            }
            RunLookupError::RunFolder(RunFolderError::Io(_) | RunFolderError::Exhausted)
            | RunLookupError::Task(_) => {
                tracing::error!("Failed to look up latest run: {}", self);
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Something went wrong: {}", self),
                )
            }
        }
    }
}

/// URL under which the `/runs` file service exposes `file_name` of run folder `run`.
pub fn run_file_url(run: &str, file_name: &str) -> String {
    format!("/runs/{}/{}", run, file_name)
}

#[derive(Serialize, Deserialize, Debug)]
pub struct RunSummary {
    pub run: String,
    pub annotated_image: Option<String>,
}

#[instrument(skip(state))]
pub async fn latest_run<M: ModelService>(
    State(state): State<SharedState<M>>,
) -> Result<Json<RunSummary>, RunLookupError> {
    let run_folders = state.pipeline.run_folders().clone();

    let summary = tokio::task::spawn_blocking(move || -> Result<RunSummary, RunFolderError> {
        let folder = run_folders.latest()?;
        let annotated_image = folder
            .find_image()?
            .map(|file_name| run_file_url(folder.name(), &file_name));
        Ok(RunSummary {
            run: folder.name().to_string(),
            annotated_image,
        })
    })
    .await
    .map_err(|e| RunLookupError::Task(e.to_string()))??;

    Ok(Json(summary))
}
