use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::stripe_events::WebhookEvent;

/// Diesel model for the processed_webhook_events table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::processed_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProcessedEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: DateTime<Utc>,
}

/// Insert model for the processed-events ledger
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewProcessedEvent {
    pub event_id: String,
    pub event_type: String,
}

/// Insert row for the failed_webhook_events (dead-letter) table
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::failed_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewFailedEvent {
    pub event_id: String,
    pub event_type: String,
    pub last_error: String,
    pub payload: serde_json::Value,
}

impl NewFailedEvent {
    pub fn from_event(event: &WebhookEvent, error: &str) -> Self {
        Self {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            last_error: error.to_string(),
            payload: serde_json::to_value(event).unwrap_or_default(),
        }
    }
}

/// Durable record of which webhook events have been handled, plus the
/// failure counts used to dead-letter events that never succeed.
///
/// Presence in the processed ledger is the only signal for "already handled".
/// Implementations must treat a second `mark_processed` for the same event
/// as a no-op.
#[async_trait]
pub trait ProcessedEventLedger: Send + Sync {
    async fn has_processed(&self, event_id: &str) -> Result<bool>;

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> Result<()>;

    /// Record a failed processing attempt; returns the failure count so far
    async fn record_failure(&self, event: &WebhookEvent, error: &str) -> Result<i32>;

    async fn mark_dead_lettered(&self, event_id: &str) -> Result<()>;

    async fn is_dead_lettered(&self, event_id: &str) -> Result<bool>;
}
