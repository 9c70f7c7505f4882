mod health;
mod metrics;
mod page;
mod predict_image;
mod runs;

use crate::server::SharedState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tower_http::services::{ServeDir, ServeFile};
use yolo_prediction::ModelService;

/// Run folders under `runs_root` are served as static files below `/runs`.
pub fn api_routes<M: ModelService>(
    runs_root: &Path,
    logo_path: Option<&Path>,
) -> Router<SharedState<M>> {
    let router = Router::new()
        .route("/", get(page::index::<M>))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler::<M>))
        .route("/api/predict", post(predict_image::predict_image::<M>))
        .route("/api/runs/latest", get(runs::latest_run::<M>))
        .nest_service("/runs", ServeDir::new(runs_root));

    match logo_path {
        Some(path) => router.route_service("/logo", ServeFile::new(path)),
        None => router.route("/logo", get(page::missing_logo)),
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

pub(crate) fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

#[cfg(test)]
mod tests {
    use super::{predict_image::PredictResponse, runs::RunSummary, *};
    use crate::{
        annotate::Annotator,
        pipeline::{DetectionPipeline, SaveOptions},
        prediction::{
            tests::{labels, png_bytes, MockModelService},
            PredictionService,
        },
        run_folder::RunFolders,
        server::{build_router, Page},
        staging::Staging,
        telemetry::Metrics,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
    };
    use std::sync::Arc;
    use tower::ServiceExt;
    use yolo_prediction::BoundingBox;

    const BOUNDARY: &str = "detection-test-boundary";

    fn router(root: &Path, detections: Vec<BoundingBox>, options: SaveOptions) -> Router {
        router_with(
            root,
            detections,
            options,
            Page::new("Spiral Technology", None),
            10 * 1024 * 1024,
        )
    }

    fn router_with(
        root: &Path,
        detections: Vec<BoundingBox>,
        options: SaveOptions,
        page: Page,
        max_upload_bytes: usize,
    ) -> Router {
        let pipeline = DetectionPipeline::new(
            Arc::new(PredictionService::new(
                MockModelService { detections },
                labels(),
            )),
            Staging::new(root.join("staging")),
            RunFolders::new(root.join("runs/detect"), "predict"),
            Annotator::new().unwrap(),
            options,
        );
        let state = SharedState {
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(Metrics::new().unwrap()),
            page: Arc::new(page),
        };
        build_router(state, max_upload_bytes)
    }

    fn all_on() -> SaveOptions {
        SaveOptions {
            save_image: true,
            save_labels: true,
            save_confidence: true,
        }
    }

    fn example_box() -> BoundingBox {
        BoundingBox {
            class_id: 2,
            confidence: 0.873,
            x1: 10.,
            y1: 20.,
            x2: 110.,
            y2: 220.,
        }
    }

    fn upload_request(field: &str, file_name: Option<&str>, data: &[u8]) -> Request<Body> {
        let disposition = match file_name {
            Some(file_name) => format!(
                "form-data; name=\"{}\"; filename=\"{}\"",
                field, file_name
            ),
            None => format!("form-data; name=\"{}\"", field),
        };
        let mut body = format!(
            "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, disposition
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/predict")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn staged_files(root: &Path) -> usize {
        std::fs::read_dir(root.join("staging"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_predict_returns_detections_and_serves_annotated_image() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![example_box()], all_on());

        let response = app
            .clone()
            .oneshot(upload_request("image", Some("street.png"), &png_bytes(640, 480)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: PredictResponse = body_json(response).await;
        assert_eq!(body.run, "predict");
        assert_eq!(body.detections.len(), 1);
        assert_eq!(
            body.document,
            "[\n    {\n        \"Class\": 2,\n        \"Confidence\": 0.87,\n        \"Width\": 100.0,\n        \"Height\": 200.0\n    }\n]"
        );
        assert_eq!(staged_files(dir.path()), 0);

        let image_url = body.annotated_image.expect("annotated image url");
        assert!(image_url.starts_with("/runs/predict/temp_image-"));

        let response = app.clone().oneshot(get_request(&image_url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let annotated = image::load_from_memory(&bytes).unwrap();
        assert_eq!((annotated.width(), annotated.height()), (640, 480));

        let response = app.oneshot(get_request("/api/runs/latest")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let latest: RunSummary = body_json(response).await;
        assert_eq!(latest.run, "predict");
        assert_eq!(latest.annotated_image.as_deref(), Some(image_url.as_str()));
    }

    #[tokio::test]
    async fn test_predict_with_zero_detections() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![], all_on());

        let response = app
            .oneshot(upload_request("image", Some("empty.jpg"), &png_bytes(32, 32)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: PredictResponse = body_json(response).await;
        assert!(body.detections.is_empty());
        assert_eq!(body.document, "[]");
    }

    #[tokio::test]
    async fn test_predict_without_file_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![], all_on());

        let response = app
            .oneshot(upload_request("note", None, b"hello"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "Something went wrong: No image uploaded");
    }

    #[tokio::test]
    async fn test_predict_rejects_unsupported_type() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![], all_on());

        let response = app
            .oneshot(upload_request("image", Some("anim.gif"), b"GIF89a"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_predict_without_run_folder_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let options = SaveOptions {
            save_image: false,
            save_labels: false,
            save_confidence: false,
        };
        let app = router(dir.path(), vec![example_box()], options);

        let response = app
            .oneshot(upload_request("image", Some("street.png"), &png_bytes(64, 64)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "Prediction folder not found.");
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_latest_without_runs_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![], all_on());

        let response = app.oneshot(get_request("/api/runs/latest")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.error, "Prediction folder not found.");
    }

    #[tokio::test]
    async fn test_predict_over_body_limit_is_payload_too_large() {
        let dir = tempfile::tempdir().unwrap();
        let app = router_with(
            dir.path(),
            vec![],
            all_on(),
            Page::new("Spiral Technology", None),
            1024,
        );

        let response = app
            .oneshot(upload_request("image", Some("big.png"), &vec![7u8; 4096]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: ErrorBody = body_json(response).await;
        assert!(body.error.starts_with("Something went wrong: Failed to read upload"));
        assert_eq!(staged_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_run_files_stay_inside_runs_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("runs/detect/predict")).unwrap();
        std::fs::write(dir.path().join("runs/secret.txt"), b"secret").unwrap();
        let app = router(dir.path(), vec![], all_on());

        let response = app
            .clone()
            .oneshot(get_request("/runs/predict/..%2F..%2Fsecret.txt"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!bytes.starts_with(b"secret"));

        let response = app
            .oneshot(get_request("/runs/predict/missing.jpg"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_files_honour_range_requests() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("runs/detect/predict");
        std::fs::create_dir_all(&run).unwrap();
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        std::fs::write(run.join("a.jpg"), &data).unwrap();
        let app = router(dir.path(), vec![], all_on());

        let request = Request::builder()
            .uri("/runs/predict/a.jpg")
            .header(header::RANGE, "bytes=0-9")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], &data[..10]);
    }

    #[tokio::test]
    async fn test_logo_is_served_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        std::fs::write(&logo, png_bytes(16, 16)).unwrap();
        let page = Page::new("Spiral Technology", Some(logo));
        let app = router_with(dir.path(), vec![], all_on(), page, 1024);

        let response = app.oneshot(get_request("/logo")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], &png_bytes(16, 16)[..]);
    }

    #[tokio::test]
    async fn test_index_health_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path(), vec![example_box()], all_on());

        let response = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8(html.to_vec()).unwrap();
        assert!(html.contains("Spiral Technology"));
        assert!(html.contains("Upload Image"));
        assert!(html.contains("Download JSON"));

        let response = app.clone().oneshot(get_request("/logo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        app.clone()
            .oneshot(upload_request("image", Some("street.png"), &png_bytes(64, 64)))
            .await
            .unwrap();

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(text.to_vec()).unwrap();
        assert!(text.contains("detection_webapp_requests_total{route=\"/api/predict\"} 1"));
        assert!(text.contains("detection_webapp_detections_total 1"));
    }
}
