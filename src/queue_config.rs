//! Configuration for the ordered webhook job queue

use std::time::Duration;

/// Minimum spacing between the starts of two consecutive jobs
pub const DEFAULT_JOB_INTERVAL_MS: u64 = 1_000;

/// Nominal backlog for the webhook queue. The channel is unbounded; this
/// only drives the backpressure warning at 80% of it.
pub const QUEUE_SOFT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub job_interval: Duration,
    pub soft_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            job_interval: Duration::from_millis(DEFAULT_JOB_INTERVAL_MS),
            soft_limit: QUEUE_SOFT_LIMIT,
        }
    }
}

impl QueueConfig {
    /// Read `WEBHOOK_QUEUE_INTERVAL_MS`, falling back to the default on
    /// missing or unparsable values
    pub fn from_env() -> Self {
        let job_interval = std::env::var("WEBHOOK_QUEUE_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_JOB_INTERVAL_MS));

        Self {
            job_interval,
            ..Default::default()
        }
    }

    pub fn with_interval(job_interval: Duration) -> Self {
        Self {
            job_interval,
            ..Default::default()
        }
    }
}

/// Calculate the warning threshold for queue depth monitoring
///
/// Returns 80% of the given size.
///
/// # Examples
/// ```
/// use bds_webhooks::queue_config::queue_warning_threshold;
///
/// assert_eq!(queue_warning_threshold(100), 80);
/// assert_eq!(queue_warning_threshold(1000), 800);
/// ```
pub const fn queue_warning_threshold(size: usize) -> usize {
    (size * 80) / 100
}
