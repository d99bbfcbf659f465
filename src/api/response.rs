use axum::Json;
use axum::http::StatusCode;

use crate::api::models::{QueuedResponse, StatusResponse};
use crate::progress::ProgressState;

pub fn summary_ready() -> (StatusCode, Json<StatusResponse>) {
    (
        StatusCode::OK,
        Json(StatusResponse {
            ready: true,
            in_progress: None,
            progress: None,
        }),
    )
}

pub fn summary_pending(progress: Option<ProgressState>) -> (StatusCode, Json<StatusResponse>) {
    (
        StatusCode::ACCEPTED,
        Json(StatusResponse {
            ready: false,
            in_progress: Some(progress.is_some()),
            progress,
        }),
    )
}

pub fn queued(url: String) -> (StatusCode, Json<QueuedResponse>) {
    (StatusCode::ACCEPTED, Json(QueuedResponse { queued: true, url }))
}
