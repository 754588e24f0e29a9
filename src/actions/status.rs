//! Liveness endpoint with queue depth and uptime

use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use crate::web::AppState;

/// Server start time - initialized when the router is built
static SERVER_START_TIME: OnceLock<Instant> = OnceLock::new();

pub fn init_server_start_time() {
    SERVER_START_TIME.get_or_init(Instant::now);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    /// Webhook jobs queued but not yet started
    pub queue_depth: usize,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub uptime_human: String,
}

/// Format seconds into a human-readable duration string
fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, secs)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let uptime_seconds = SERVER_START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(HealthResponse {
        status: "ok",
        queue_depth: state.queue.depth(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
        uptime_human: format_duration(uptime_seconds),
    })
}
