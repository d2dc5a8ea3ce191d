use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::error::SwapError;
use crate::generate::{generate, AppState};
use crate::models::SwapRequest;

pub const SWAP_REPORT_HEADER: HeaderName = HeaderName::from_static("x-swap-report");

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate", get(generate_query).post(generate_form))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn generate_query(
    State(state): State<Arc<AppState>>,
    Query(req): Query<SwapRequest>,
) -> Response {
    generate_endpoint(&state, req).await
}

async fn generate_form(
    State(state): State<Arc<AppState>>,
    Form(req): Form<SwapRequest>,
) -> Response {
    generate_endpoint(&state, req).await
}

async fn generate_endpoint(state: &AppState, req: SwapRequest) -> Response {
    tracing::info!(
        target_url = %req.target_url,
        source_url = %req.source_url,
        mode = state.capability.name(),
        "generate requested"
    );

    match generate(state, &req).await {
        Ok(generated) => {
            let summary = generated
                .report
                .map(|r| r.summary())
                .unwrap_or_else(|| "static".to_string());
            let report = HeaderValue::from_str(&summary)
                .unwrap_or_else(|_| HeaderValue::from_static("unavailable"));
            (
                StatusCode::OK,
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("text/html; charset=utf-8"),
                    ),
                    (SWAP_REPORT_HEADER, report),
                ],
                generated.html,
            )
                .into_response()
        }
        Err(e) => {
            tracing::warn!(error = %e, "generate failed");
            error_response(&e)
        }
    }
}

fn error_status(e: &SwapError) -> StatusCode {
    match e {
        SwapError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
        SwapError::Parse { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SwapError::Fetch { .. } | SwapError::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
        SwapError::PageUnavailable { .. } | SwapError::Browser(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SwapError::NavigationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn error_response(e: &SwapError) -> Response {
    (
        error_status(e),
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("Error: {e}"),
    )
        .into_response()
}
