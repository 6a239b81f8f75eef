//! Health check endpoint
//!
//! Liveness probe: answers 200 whenever the process is up, regardless of
//! MongoDB or collaborator status. Body carries enough for a deployment
//! dashboard to tell instances apart.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Operating mode: "production" or "dev"
    pub mode: &'static str,
    /// Store backing: "mongodb" or "memory"
    pub store: &'static str,
    pub node_id: String,
    pub timestamp: String,
}

pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: if state.args.dev_mode { "dev" } else { "production" },
        store: state.store_kind,
        node_id: state.args.node_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    let body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
