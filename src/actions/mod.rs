use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

pub mod status;
pub mod stripe_webhooks;

pub use status::*;
pub use stripe_webhooks::*;

/// Error body in the shape `{"errors": "<message>"}`
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "errors": message }))).into_response()
}
