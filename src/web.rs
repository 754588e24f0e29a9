use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::actions;
use crate::processed_events::ProcessedEventLedger;
use crate::signature::SignatureVerifier;
use crate::webhook_config::AckMode;
use crate::webhook_queue::WebhookQueue;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Stripe event payloads are a few KB; anything near this is not Stripe
const MAX_WEBHOOK_BODY_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<SignatureVerifier>,
    pub ledger: Arc<dyn ProcessedEventLedger>,
    pub queue: WebhookQueue,
    pub ack_mode: AckMode,
    pub metrics: Option<PrometheusHandle>,
}

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logs each request with a short correlation id, echoed back as `x-request-id`
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let started = Instant::now();

    debug!(%method, %path, request_id = %request_id, "Request received");

    let mut response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    info!(
        %method,
        %path,
        request_id = %request_id,
        status,
        elapsed_ms = format!("{:.2}", elapsed_ms),
        "Request completed"
    );

    response
}

/// Reports 5xx responses to Sentry
async fn sentry_error_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status();
    if status.is_server_error() {
        error!(%method, %path, status = status.as_u16(), "Server error response");

        sentry::with_scope(
            |scope| {
                scope.set_tag("http.method", method.as_str());
                scope.set_tag("http.path", &path);
                scope.set_tag("http.status_code", status.as_u16().to_string());
            },
            || {
                sentry::capture_message(
                    &format!("HTTP {} on {} {}", status.as_u16(), method, path),
                    sentry::Level::Error,
                )
            },
        );
    }

    response
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    actions::init_server_start_time();

    let webhook_router = Router::new()
        .route("/stripe/webhooks", post(actions::handle_webhook))
        .layer(RequestBodyLimitLayer::new(MAX_WEBHOOK_BODY_BYTES));

    Router::new()
        .merge(webhook_router)
        .route("/health", get(actions::health))
        .route("/metrics", get(actions::metrics_handler))
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(middleware::from_fn(sentry_error_middleware))
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
///
/// The router (and with it this server's queue handle) is dropped before
/// returning.
pub async fn start_web_server<F>(
    interface: String,
    port: u16,
    state: AppState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "web-server");
    });
    info!("Starting web server on {}:{}", interface, port);

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Web server stopped");
    Ok(())
}
