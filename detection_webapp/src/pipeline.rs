use crate::{
    annotate::{write_labels, AnnotateError, Annotator},
    config::OutputConfig,
    detection::{format_detections, to_json_document, Detection},
    prediction::{Prediction, PredictionService},
    run_folder::{RunFolder, RunFolderError, RunFolders},
    staging::{Staging, StagingError, TemporaryFile},
    upload::UploadedImage,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;
use yolo_prediction::{ModelService, PredictionError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{0}")]
    RunFolder(#[from] RunFolderError),
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),
    #[error("Prediction failed: {0}")]
    Prediction(#[from] PredictionError),
    #[error("Annotation failed: {0}")]
    Annotate(#[from] AnnotateError),
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// The `save`, `save_txt` and `save_conf` switches of one invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaveOptions {
    pub save_image: bool,
    pub save_labels: bool,
    pub save_confidence: bool,
}

impl SaveOptions {
    fn needs_run_folder(&self) -> bool {
        self.save_image || self.save_labels
    }
}

impl From<&OutputConfig> for SaveOptions {
    fn from(config: &OutputConfig) -> Self {
        Self {
            save_image: config.save_image,
            save_labels: config.save_labels,
            save_confidence: config.save_confidence,
        }
    }
}

/// What the invoker hands back: the raw prediction and the folder it wrote.
#[derive(Debug)]
pub struct Invocation {
    pub prediction: Prediction,
    pub run_folder: Option<RunFolder>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub run_folder: RunFolder,
    pub annotated_image: Option<String>,
    pub detections: Vec<Detection>,
    pub document: String,
}

pub struct DetectionPipeline<M: ModelService> {
    prediction_service: Arc<PredictionService<M>>,
    staging: Staging,
    run_folders: RunFolders,
    annotator: Arc<Annotator>,
    options: SaveOptions,
}

impl<M: ModelService> DetectionPipeline<M> {
    pub fn new(
        prediction_service: Arc<PredictionService<M>>,
        staging: Staging,
        run_folders: RunFolders,
        annotator: Annotator,
        options: SaveOptions,
    ) -> Self {
        Self {
            prediction_service,
            staging,
            run_folders,
            annotator: Arc::new(annotator),
            options,
        }
    }

    pub fn run_folders(&self) -> &RunFolders {
        &self.run_folders
    }

    /// Stage, predict, persist, locate, format. The staged file is gone when this returns.
    #[instrument(
        skip(self, upload),
        fields(file_name = %upload.file_name, size = upload.bytes.len())
    )]
    pub async fn process(&self, upload: UploadedImage) -> Result<PipelineOutput, PipelineError> {
        let staging = self.staging.clone();
        let image = upload.image;
        let staged = tokio::task::spawn_blocking(move || staging.stage(&image))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;

        let invocation = self.invoke(&staged).await?;
        let run_folder = invocation.run_folder.ok_or(RunFolderError::NotFound)?;

        let file_name = staged.file_name().to_string();
        let save_image = self.options.save_image;
        let (run_folder, annotated_image) =
            tokio::task::spawn_blocking(move || -> Result<_, RunFolderError> {
                let annotated_path = run_folder.locate_output(&file_name)?;
                let annotated_image = (save_image && annotated_path.is_file()).then_some(file_name);
                Ok((run_folder, annotated_image))
            })
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))??;

        let detections = format_detections(&invocation.prediction.batch.detections);
        let document = to_json_document(&detections)?;

        tracing::info!(
            "Run {} produced {} detections",
            run_folder.name(),
            detections.len()
        );

        Ok(PipelineOutput {
            run_folder,
            annotated_image,
            detections,
            document,
        })
    }

    /// Runs the model on the staged file and persists the outputs the options ask for.
    /// The annotated image is drawn on the staged JPEG, the same pixels the model saw.
    pub async fn invoke(&self, staged: &TemporaryFile) -> Result<Invocation, PipelineError> {
        tracing::debug!("Running model on {:?}", staged.path());
        let image_data = tokio::fs::read(staged.path())
            .await
            .map_err(StagingError::Read)?;
        let staged_image = self.options.save_image.then(|| image_data.clone());
        let prediction = self.prediction_service.predict(image_data).await?;

        if !self.options.needs_run_folder() {
            return Ok(Invocation {
                prediction,
                run_folder: None,
            });
        }

        let run_folders = self.run_folders.clone();
        let options = self.options;
        let annotator = self.annotator.clone();
        let file_name = staged.file_name().to_string();
        let labeled = prediction.labeled.clone();
        let (width, height) = (
            prediction.batch.image_width,
            prediction.batch.image_height,
        );

        let run_folder = tokio::task::spawn_blocking(move || -> Result<RunFolder, PipelineError> {
            let run_folder = run_folders.create()?;
            if let Some(data) = staged_image {
                let mut image = image::load_from_memory(&data)
                    .map_err(AnnotateError::Decode)?
                    .to_rgb8();
                annotator.annotate(&mut image, &labeled);
                image
                    .save(run_folder.output_path(&file_name))
                    .map_err(AnnotateError::from)?;
            }
            if options.save_labels {
                write_labels(
                    &run_folder.label_path(&file_name),
                    &labeled,
                    width,
                    height,
                    options.save_confidence,
                )?;
            }
            Ok(run_folder)
        })
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))??;

        Ok(Invocation {
            prediction,
            run_folder: Some(run_folder),
        })
    }
}
