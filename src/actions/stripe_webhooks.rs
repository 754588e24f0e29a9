use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::signature::{SIGNATURE_HEADER, VerificationError};
use crate::web::AppState;
use crate::webhook_config::AckMode;

use super::json_error;

/// Body returned to Stripe for every accepted delivery
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dead_lettered: bool,
}

impl WebhookAck {
    fn received() -> Response {
        (
            StatusCode::OK,
            Json(Self {
                received: true,
                ..Default::default()
            }),
        )
            .into_response()
    }

    fn duplicate() -> Response {
        (
            StatusCode::OK,
            Json(Self {
                received: true,
                duplicate: true,
                ..Default::default()
            }),
        )
            .into_response()
    }

    fn dead_lettered() -> Response {
        (
            StatusCode::OK,
            Json(Self {
                received: true,
                dead_lettered: true,
                ..Default::default()
            }),
        )
            .into_response()
    }
}

/// Stripe webhook endpoint.
///
/// Verifies the signature over the raw body, drops deliveries already
/// handled, and hands everything else to the ordered queue. Depending on
/// the ack mode the response is sent after the job finishes or as soon as
/// it is queued.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    metrics::counter!("webhook.received").increment(1);
    let start = std::time::Instant::now();

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let event = match state.verifier.construct_event(&body, signature) {
        Ok(event) => event,
        Err(VerificationError::MalformedPayload(e)) => {
            warn!(error = %e, "Webhook payload is not a valid event");
            metrics::counter!("webhook.signature_invalid", "reason" => "payload").increment(1);
            return json_error(StatusCode::BAD_REQUEST, "Invalid webhook payload");
        }
        Err(e) => {
            warn!(error = %e, "Invalid webhook signature");
            metrics::counter!("webhook.signature_invalid", "reason" => "signature").increment(1);
            return json_error(StatusCode::BAD_REQUEST, "Invalid webhook signature");
        }
    };

    let event_id = event.id.clone();
    let event_type = event.event_type.clone();

    // A ledger read failure falls through; the existing-order check still applies
    match state.ledger.has_processed(&event_id).await {
        Ok(true) => {
            info!(event_id = %event_id, event_type = %event_type, "Duplicate webhook delivery");
            metrics::counter!("webhook.duplicate").increment(1);
            return WebhookAck::duplicate();
        }
        Ok(false) => {}
        Err(e) => {
            error!(event_id = %event_id, error = %e, "Failed to check webhook idempotency");
        }
    }

    match state.ledger.is_dead_lettered(&event_id).await {
        Ok(true) => {
            warn!(event_id = %event_id, event_type = %event_type, "Delivery of dead-lettered webhook event acknowledged");
            return WebhookAck::dead_lettered();
        }
        Ok(false) => {}
        Err(e) => {
            error!(event_id = %event_id, error = %e, "Failed to check dead-letter status");
        }
    }

    let ticket = match state.queue.submit(event) {
        Ok(ticket) => ticket,
        Err(e) => {
            error!(event_id = %event_id, error = %e, "Failed to queue webhook event");
            return json_error(StatusCode::SERVICE_UNAVAILABLE, "Webhook queue unavailable");
        }
    };

    let response = match state.ack_mode {
        AckMode::OnEnqueue => WebhookAck::received(),
        AckMode::AfterProcessing => match ticket.wait().await {
            Ok(()) => WebhookAck::received(),
            Err(e) => {
                error!(event_id = %event_id, event_type = %event_type, error = %e, "Webhook processing failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed")
            }
        },
    };

    let duration_ms = start.elapsed().as_millis() as f64;
    metrics::histogram!("webhook.request.duration_ms").record(duration_ms);

    response
}

/// Prometheus scrape endpoint
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Metrics are not enabled"),
    }
}
