//! HTTP server
//!
//! hyper http1 with TokioIo, one spawned task per connection. Routing is a
//! plain method/path match; the semantics live in the services the handlers
//! call into.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::intake::OrderIntake;
use crate::knot::KnotService;
use crate::logging::UsageLogger;
use crate::reconcile::ReconcileEngine;
use crate::routes;
use crate::store::FulfillmentStore;
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<FulfillmentStore>,
    pub engine: Arc<ReconcileEngine>,
    pub intake: Arc<OrderIntake>,
    pub knots: Arc<KnotService>,
    pub usage: UsageLogger,
    /// "mongodb" or "memory", reported by the health endpoint
    pub store_kind: &'static str,
    pub started_at: Instant,
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Keepsake listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - unsigned webhooks accepted");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("{} {}", method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        (Method::POST, "/webhooks/payment") => {
            routes::handle_payment_webhook(Arc::clone(&state), req).await
        }

        (Method::POST, "/api/gifts") => {
            routes::handle_create_gift(Arc::clone(&state), req).await
        }

        (Method::GET, p) if p.starts_with("/api/knots/view/") => {
            match token_segment(p, "/api/knots/view/") {
                Some(token) => routes::handle_view(Arc::clone(&state), token).await,
                None => bad_request_response("missing access token"),
            }
        }

        (Method::POST, p) if p.starts_with("/api/knots/open/") => {
            match token_segment(p, "/api/knots/open/") {
                Some(token) => routes::handle_open(Arc::clone(&state), token).await,
                None => bad_request_response("missing access token"),
            }
        }

        (Method::GET, p) if p.starts_with("/api/knots/opened/") => {
            match token_segment(p, "/api/knots/opened/") {
                Some(token) => routes::handle_opened(Arc::clone(&state), token).await,
                None => bad_request_response("missing access token"),
            }
        }

        (Method::POST, p) if p.starts_with("/api/knots/reseal/") => {
            match token_segment(p, "/api/knots/reseal/") {
                Some(token) => routes::handle_reseal(Arc::clone(&state), token).await,
                None => bad_request_response("missing access token"),
            }
        }

        (Method::OPTIONS, _) => preflight_response(),

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// Extract the trailing token path segment; rejects empty and nested paths
fn token_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let token = path.strip_prefix(prefix)?;
    if token.is_empty() || token.contains('/') {
        return None;
    }
    Some(token)
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

/// Bad request response
fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message,
    });

    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_segment_extraction() {
        assert_eq!(
            token_segment("/api/knots/view/abc123", "/api/knots/view/"),
            Some("abc123")
        );
        assert_eq!(token_segment("/api/knots/view/", "/api/knots/view/"), None);
        assert_eq!(
            token_segment("/api/knots/view/a/b", "/api/knots/view/"),
            None
        );
    }
}
