use serde::{Deserialize, Serialize};

use crate::progress::ProgressState;

#[derive(Deserialize)]
pub struct SummarizeQuery {
    pub url: String,
    /// Bypasses the cache read and forces a fresh provider call.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Serialize)]
pub struct SummarizeResponse {
    pub summary: String,
    pub cached: bool,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    pub url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_progress: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressState>,
}

/// Returned when queue mode diverts a request to the client-side queue.
#[derive(Serialize)]
pub struct QueuedResponse {
    pub queued: bool,
    pub url: String,
}
