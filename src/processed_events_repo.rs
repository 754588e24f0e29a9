use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;

use crate::processed_events::{NewFailedEvent, NewProcessedEvent, ProcessedEventLedger};
use crate::stripe_events::WebhookEvent;
use crate::web::PgPool;

#[derive(Clone)]
pub struct ProcessedEventsRepository {
    pool: PgPool,
}

impl ProcessedEventsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventLedger for ProcessedEventsRepository {
    /// Check if an event has already been processed (idempotency)
    async fn has_processed(&self, event_id: &str) -> Result<bool> {
        use crate::schema::processed_webhook_events::dsl;

        let pool = self.pool.clone();
        let event_id = event_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let exists: bool = diesel::select(diesel::dsl::exists(
                dsl::processed_webhook_events.filter(dsl::event_id.eq(&event_id)),
            ))
            .get_result(&mut conn)?;

            Ok::<bool, anyhow::Error>(exists)
        })
        .await??;

        Ok(result)
    }

    /// Record an event as processed; a second insert for the same id is ignored
    async fn mark_processed(&self, event_id: &str, event_type: &str) -> Result<()> {
        use crate::schema::processed_webhook_events::dsl;

        let pool = self.pool.clone();
        let new_record = NewProcessedEvent {
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
        };
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(dsl::processed_webhook_events)
                .values(&new_record)
                .on_conflict(dsl::event_id)
                .do_nothing()
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn record_failure(&self, event: &WebhookEvent, error: &str) -> Result<i32> {
        use crate::schema::failed_webhook_events::dsl;

        let pool = self.pool.clone();
        let new_failure = NewFailedEvent::from_event(event, error);
        let count = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let count: i32 = diesel::insert_into(dsl::failed_webhook_events)
                .values(&new_failure)
                .on_conflict(dsl::event_id)
                .do_update()
                .set((
                    dsl::failure_count.eq(dsl::failure_count + 1),
                    dsl::last_error.eq(&new_failure.last_error),
                    dsl::last_failed_at.eq(diesel::dsl::now),
                ))
                .returning(dsl::failure_count)
                .get_result(&mut conn)?;

            Ok::<i32, anyhow::Error>(count)
        })
        .await??;

        Ok(count)
    }

    async fn mark_dead_lettered(&self, event_id: &str) -> Result<()> {
        use crate::schema::failed_webhook_events;

        let pool = self.pool.clone();
        let event_id = event_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::update(failed_webhook_events::table)
                .filter(failed_webhook_events::event_id.eq(&event_id))
                .set(failed_webhook_events::dead_lettered.eq(true))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn is_dead_lettered(&self, event_id: &str) -> Result<bool> {
        use crate::schema::failed_webhook_events::dsl;

        let pool = self.pool.clone();
        let event_id = event_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let exists: bool = diesel::select(diesel::dsl::exists(
                dsl::failed_webhook_events
                    .filter(dsl::event_id.eq(&event_id))
                    .filter(dsl::dead_lettered.eq(true)),
            ))
            .get_result(&mut conn)?;

            Ok::<bool, anyhow::Error>(exists)
        })
        .await??;

        Ok(result)
    }
}
