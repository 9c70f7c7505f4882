use crate::annotate::Annotator;
use crate::config::Config;
use crate::pipeline::{DetectionPipeline, SaveOptions};
use crate::prediction::PredictionService;
use crate::run_folder::RunFolders;
use crate::server::HttpServer;
use crate::staging::Staging;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};
use yolo_prediction::{OrtModelService, ServiceState, State};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let service_state = ServiceState::new(&config.labels).map_err(|e| {
        tracing::error!("Failed to initialize labels: {}", e);
        e
    })?;

    let prediction_service = Arc::new(PredictionService::new(
        model_service,
        service_state.get_labels().clone(),
    ));

    let annotator = match &config.assets.font_path {
        Some(font_path) => match Annotator::with_font_file(font_path) {
            Ok(annotator) => annotator,
            Err(e) => {
                tracing::warn!("Falling back to the bundled font: {}", e);
                Annotator::new()?
            }
        },
        None => Annotator::new()?,
    };

    let pipeline = Arc::new(DetectionPipeline::new(
        prediction_service,
        Staging::new(&config.output.staging_dir),
        RunFolders::new(&config.output.runs_root, &config.output.run_prefix),
        annotator,
        SaveOptions::from(&config.output),
    ));

    let server = HttpServer::new(pipeline, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
