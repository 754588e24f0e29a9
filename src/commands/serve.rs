use anyhow::{Context, Result};
use bds_webhooks::checkout::CheckoutCompletionHandler;
use bds_webhooks::database;
use bds_webhooks::email::{DisabledMailer, EmailConfig, MailTransport, SmtpMailer};
use bds_webhooks::notifications::NotificationDispatcher;
use bds_webhooks::orders_repo::OrdersRepository;
use bds_webhooks::processed_events::ProcessedEventLedger;
use bds_webhooks::processed_events_repo::ProcessedEventsRepository;
use bds_webhooks::profiles_repo::ProfilesRepository;
use bds_webhooks::queue_config::QueueConfig;
use bds_webhooks::signature::SignatureVerifier;
use bds_webhooks::web::{AppState, start_web_server};
use bds_webhooks::webhook_config::WebhookConfig;
use bds_webhooks::webhook_processor::WebhookEventProcessor;
use bds_webhooks::webhook_queue::WebhookQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Upper bound on waiting for accepted jobs after the server stops
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn handle_serve(interface: String, port: u16) -> Result<()> {
    sentry::configure_scope(|scope| {
        scope.set_tag("operation", "serve");
    });

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let webhook_config = WebhookConfig::from_env()?;
    let queue_config = QueueConfig::from_env();
    info!(
        ack_mode = ?webhook_config.ack_mode,
        dead_letter_after = webhook_config.dead_letter_after,
        job_interval_ms = queue_config.job_interval.as_millis() as u64,
        "Loaded webhook configuration"
    );

    let metrics_handle = bds_webhooks::metrics::init_metrics()?;
    bds_webhooks::metrics::initialize_webhook_metrics();
    tokio::spawn(bds_webhooks::metrics::process_metrics_task());

    let pool = database::create_pool(&database_url)?;
    database::run_migrations(&pool).await?;

    let transport: Arc<dyn MailTransport> = match EmailConfig::from_env() {
        Ok(config) => Arc::new(SmtpMailer::new(config)?),
        Err(e) => {
            warn!(
                "Email is not configured ({}); purchase confirmations will not be sent",
                e
            );
            Arc::new(DisabledMailer)
        }
    };
    let base_url =
        std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let orders = Arc::new(OrdersRepository::new(pool.clone()));
    let profiles = Arc::new(ProfilesRepository::new(pool.clone()));
    let ledger: Arc<dyn ProcessedEventLedger> =
        Arc::new(ProcessedEventsRepository::new(pool.clone()));

    let dispatcher = NotificationDispatcher::new(profiles.clone(), transport, base_url);
    let checkout = CheckoutCompletionHandler::new(orders, profiles, dispatcher, ledger.clone());
    let processor = WebhookEventProcessor::new(
        checkout,
        ledger.clone(),
        webhook_config.dead_letter_after,
    );

    let (queue, worker) = WebhookQueue::start(Arc::new(processor), queue_config);

    let state = AppState {
        verifier: Arc::new(SignatureVerifier::new(
            webhook_config.signing_secret.clone(),
            webhook_config.tolerance_secs,
        )),
        ledger,
        queue,
        ack_mode: webhook_config.ack_mode,
        metrics: Some(metrics_handle),
    };

    // The server owns the only queue handle; once it returns the worker
    // sees the channel close after draining what was accepted
    start_web_server(interface, port, state, shutdown_signal()).await?;

    info!(
        "Waiting up to {}s for queued webhook jobs to finish",
        DRAIN_TIMEOUT.as_secs()
    );
    match tokio::time::timeout(DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => info!("Webhook queue drained"),
        Ok(Err(e)) => error!("Webhook queue worker failed: {}", e),
        Err(_) => warn!("Timed out waiting for webhook queue to drain; pending jobs are dropped"),
    }

    info!("Graceful shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Unable to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
