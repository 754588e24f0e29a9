use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::{Duration, Instant};

/// Initialize Prometheus metrics exporter
/// Returns a handle that can be used to render metrics for scraping
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        // Buckets: 5ms .. 30s; jobs include SMTP round trips
        .set_buckets_for_metric(
            Matcher::Full("webhook.job.duration_ms".to_string()),
            &[
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
                30_000.0,
            ],
        )?
        .set_buckets_for_metric(
            Matcher::Full("webhook.request.duration_ms".to_string()),
            &[
                1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0,
            ],
        )?
        .install_recorder()?;

    Ok(handle)
}

/// Initialize webhook pipeline metrics to zero/default values
/// This ensures metrics always appear in Prometheus queries even if no events have occurred
pub fn initialize_webhook_metrics() {
    // Intake
    metrics::counter!("webhook.received").absolute(0);
    metrics::counter!("webhook.signature_invalid").absolute(0);
    metrics::counter!("webhook.duplicate").absolute(0);

    // Queue
    metrics::gauge!("webhook.queue.depth").set(0.0);
    metrics::counter!("webhook.job.failed").absolute(0);
    metrics::counter!("webhook.dead_lettered").absolute(0);
    metrics::counter!("webhook.payment_failed").absolute(0);
    metrics::counter!("webhook.ignored").absolute(0);

    // Checkout
    metrics::counter!("checkout.orders_created").absolute(0);
    metrics::counter!("checkout.duplicates").absolute(0);

    // Notifications
    metrics::counter!("notifications.sent").absolute(0);
    metrics::counter!("notifications.failed").absolute(0);
}

/// Background task to update process metrics
/// Updates uptime and memory usage metrics every 5 seconds
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        metrics::gauge!("process.uptime.seconds").set(start_time.elapsed().as_secs() as f64);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                for line in status.lines() {
                    if line.starts_with("VmRSS:") {
                        // RSS in kB
                        if let Some(kb_str) = line.split_whitespace().nth(1)
                            && let Ok(kb) = kb_str.parse::<f64>()
                        {
                            metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
                        }
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
