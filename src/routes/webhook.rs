//! Payment webhook endpoint
//!
//! POST /webhooks/payment. The answer tells the processor what to do:
//! 200 stops redelivery (handled or already handled), 400 flags an event
//! we can never attribute, 5xx asks for another delivery attempt.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{error, warn};

use crate::payments;
use crate::reconcile::WebhookDisposition;
use crate::server::AppState;

/// Header carrying the processor's `t=...,v1=...` signature
pub const SIGNATURE_HEADER: &str = "keepsake-signature";

pub async fn handle_payment_webhook(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Webhook body read failed");
            return json_error(StatusCode::BAD_REQUEST, "failed to read request body");
        }
    };

    let event = match payments::parse_event(
        &body,
        signature.as_deref(),
        &state.args.webhook_secret(),
        state.args.dev_mode,
        chrono::Utc::now().timestamp(),
    ) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Webhook rejected at parse");
            return json_error(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    match state.engine.on_webhook_event(&event).await {
        Ok(WebhookDisposition::Ack) => {
            let body = serde_json::json!({ "received": true });
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body.to_string())))
                .unwrap()
        }
        Ok(WebhookDisposition::Reject(reason)) => {
            json_error(StatusCode::BAD_REQUEST, &reason)
        }
        Err(e) => {
            // 5xx so the processor redelivers once the fault clears
            error!(error = %e, "Webhook reconciliation errored");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "reconciliation failed")
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
