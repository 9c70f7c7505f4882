use crate::{
    config::Config, detection::DOCUMENT_FILE_NAME, pipeline::DetectionPipeline,
    routes::api_routes, telemetry::Metrics,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use yolo_prediction::ModelService;

const INDEX_TEMPLATE: &str = include_str!("../assets/index.html");
const LOGO_MARKUP: &str = r#"<img class="logo" src="/logo" alt="logo">"#;

/// The rendered single page plus the logo it links to.
#[derive(Debug)]
pub struct Page {
    html: String,
    logo_path: Option<PathBuf>,
}

impl Page {
    pub fn new(title: &str, logo_path: Option<PathBuf>) -> Self {
        let logo = if logo_path.is_some() { LOGO_MARKUP } else { "" };
        let html = INDEX_TEMPLATE
            .replace("{{title}}", &escape_html(title))
            .replace("{{logo}}", logo)
            .replace("{{document_name}}", DOCUMENT_FILE_NAME);

        Self { html, logo_path }
    }

    /// The logo is optional and only linked when the file is there at startup.
    pub fn from_config(config: &Config) -> Self {
        let logo_path = config.assets.logo_path.clone();
        if logo_path.is_file() {
            Self::new(&config.page_title, Some(logo_path))
        } else {
            tracing::info!("No logo at {:?}, rendering page without one", logo_path);
            Self::new(&config.page_title, None)
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn logo_path(&self) -> Option<&Path> {
        self.logo_path.as_deref()
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub pipeline: Arc<DetectionPipeline<M>>,
    pub metrics: Arc<Metrics>,
    pub page: Arc<Page>,
}

pub fn build_router<M: ModelService>(state: SharedState<M>, max_upload_bytes: usize) -> Router {
    let routes = api_routes::<M>(state.pipeline.run_folders().root(), state.page.logo_path());

    Router::new()
        .merge(routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        pipeline: Arc<DetectionPipeline<M>>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new()?);

        let app_state = SharedState {
            pipeline,
            metrics,
            page: Arc::new(Page::from_config(config)),
        };

        let router = build_router(app_state, config.server.max_upload_bytes());

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}
