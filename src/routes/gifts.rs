//! Order intake endpoint
//!
//! POST /api/gifts. Opens the ledger and answers with the checkout URL the
//! buyer is redirected to. Generation continues in the background.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{error, warn};

use crate::intake::IntakeRequest;
use crate::server::AppState;
use crate::types::KeepsakeError;

pub async fn handle_create_gift(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Gift order body read failed");
            return json_error(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let request: IntakeRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Gift order body invalid");
            return json_error(StatusCode::BAD_REQUEST, &format!("invalid order: {}", e));
        }
    };

    match state.intake.create_order(request).await {
        Ok(response) => {
            let body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
            Response::builder()
                .status(StatusCode::CREATED)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        Err(KeepsakeError::InvalidState(message)) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, &message)
        }
        Err(e) => {
            error!(error = %e, "Gift order failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "order creation failed")
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message });
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}
