//! Recipient-facing knot endpoints
//!
//! All four endpoints are token-gated: the access token in the path is the
//! whole authorization. The view endpoint never includes the sealed
//! message; the open and opened endpoints disclose it according to the
//! state machine.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;

use crate::knot::OpenOutcome;
use crate::server::AppState;
use crate::types::KeepsakeError;

/// GET /api/knots/view/{token}
pub async fn handle_view(state: Arc<AppState>, token: &str) -> Response<Full<Bytes>> {
    match state.knots.view(token).await {
        Ok(view) => match serde_json::to_value(&view) {
            Ok(body) => json_response(StatusCode::OK, &body),
            Err(e) => error_response(KeepsakeError::Http(e.to_string())),
        },
        Err(e) => error_response(e),
    }
}

/// POST /api/knots/open/{token}
pub async fn handle_open(state: Arc<AppState>, token: &str) -> Response<Full<Bytes>> {
    match state.knots.open(token).await {
        Ok(OpenOutcome::NotYet { available_at }) => json_response(
            StatusCode::FORBIDDEN,
            &serde_json::json!({
                "status": "not_yet",
                "available_at_ms": available_at.timestamp_millis(),
            }),
        ),
        Ok(OpenOutcome::Untying { message, due_at }) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "untying",
                "message": message,
                "untied_at_ms": due_at.timestamp_millis(),
            }),
        ),
        Ok(OpenOutcome::AlreadyUntied { message, untied_at }) => json_response(
            StatusCode::OK,
            &serde_json::json!({
                "status": "untied",
                "message": message,
                "untied_at_ms": untied_at.map(|t| t.timestamp_millis()),
            }),
        ),
        Err(e) => error_response(e),
    }
}

/// GET /api/knots/opened/{token}
pub async fn handle_opened(state: Arc<AppState>, token: &str) -> Response<Full<Bytes>> {
    match state.knots.opened(token).await {
        Ok(message) => json_response(
            StatusCode::OK,
            &serde_json::json!({ "message": message }),
        ),
        Err(e) => error_response(e),
    }
}

/// POST /api/knots/reseal/{token}
pub async fn handle_reseal(state: Arc<AppState>, token: &str) -> Response<Full<Bytes>> {
    match state.knots.reseal(token).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "resealed": true })),
        Err(e) => error_response(e),
    }
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(value.to_string())))
        .unwrap()
}

fn error_response(error: KeepsakeError) -> Response<Full<Bytes>> {
    let status = match &error {
        KeepsakeError::NotFound(..) => StatusCode::NOT_FOUND,
        KeepsakeError::InvalidState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, &serde_json::json!({ "error": error.to_string() }))
}
