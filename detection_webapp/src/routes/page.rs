use super::error_response;
use crate::server::SharedState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Response},
};
use yolo_prediction::ModelService;

pub async fn index<M: ModelService>(State(state): State<SharedState<M>>) -> Html<String> {
    Html(state.page.html().to_string())
}

pub async fn missing_logo() -> Response {
    error_response(StatusCode::NOT_FOUND, "No logo configured".to_string())
}
