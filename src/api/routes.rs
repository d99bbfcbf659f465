use axum::{
    Router,
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;
use crate::api::models::{StatusQuery, SummarizeQuery, SummarizeResponse};
use crate::api::response;
use crate::bridge::{Command, Outbound, handle_command, no_config_error, resolve_config};

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/summarize", get(summarize_handler))
        .route("/summary-status", get(status_handler))
        .route("/api/message", post(message_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn summarize_handler(
    State(state): State<AppState>,
    Query(query): Query<SummarizeQuery>,
) -> axum::response::Response {
    tracing::info!(url = %query.url, refresh = query.refresh, "summarize request");

    // Queue mode diverts the article to the client-side queue instead of
    // summarizing now.
    if state.bridge.get_queue_mode().await {
        state.bridge.notify(Outbound::AddToQueue {
            url: query.url.clone(),
            timestamp: Utc::now().to_rfc3339(),
        });
        return response::queued(query.url).into_response();
    }

    let Some(config) = resolve_config(&state).await else {
        return no_config_error().into_response();
    };

    match state.summarizer.summarize(&query.url, &config, query.refresh).await {
        Ok(outcome) => {
            tracing::info!(url = %query.url, cached = outcome.cached, "summary ready");
            Json(SummarizeResponse {
                summary: outcome.summary,
                cached: outcome.cached,
            })
            .into_response()
        }
        Err(err) => {
            tracing::warn!(url = %query.url, kind = ?err.kind, "summarization failed: {}", err.message);
            err.into_response()
        }
    }
}

async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    if state.cache.get(&query.url).is_some() {
        return response::summary_ready();
    }
    response::summary_pending(state.progress.snapshot(&query.url))
}

async fn message_handler(
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> impl IntoResponse {
    Json(handle_command(&state, command).await)
}
