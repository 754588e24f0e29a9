use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checkout::{CheckoutCompletionHandler, CheckoutError, CheckoutOutcome};
use crate::processed_events::ProcessedEventLedger;
use crate::stripe_events::{EventKind, WebhookEvent};
use crate::webhook_queue::JobHandler;

#[derive(Debug, Error)]
#[error("webhook handler panicked: {0}")]
pub struct HandlerPanic(pub String);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Whether redelivering the same event can ever succeed.
///
/// Bad metadata and handler panics repeat on every delivery; storage
/// errors do not, so those are never dead-lettered.
pub fn is_permanent_failure(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<HandlerPanic>().is_some() {
        return true;
    }
    err.downcast_ref::<CheckoutError>()
        .is_some_and(CheckoutError::is_data_fault)
}

/// Routes queued webhook events to their handlers and tracks repeated
/// failures so an event that can never succeed is eventually dead-lettered.
pub struct WebhookEventProcessor {
    checkout: CheckoutCompletionHandler,
    ledger: Arc<dyn ProcessedEventLedger>,
    dead_letter_after: i32,
}

impl WebhookEventProcessor {
    pub fn new(
        checkout: CheckoutCompletionHandler,
        ledger: Arc<dyn ProcessedEventLedger>,
        dead_letter_after: i32,
    ) -> Self {
        Self {
            checkout,
            ledger,
            dead_letter_after,
        }
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<()> {
        match event.kind() {
            EventKind::CheckoutCompleted => {
                match self.checkout.handle(event).await? {
                    CheckoutOutcome::Recorded {
                        order_id, notified, ..
                    } => debug!(event_id = %event.id, %order_id, notified, "Checkout handled"),
                    CheckoutOutcome::AlreadyRecorded { stripe_checkout_id } => {
                        debug!(event_id = %event.id, %stripe_checkout_id, "Checkout already handled")
                    }
                }
                Ok(())
            }
            EventKind::PaymentFailed => {
                match event.payment_intent() {
                    Ok(intent) => {
                        let failure = intent.last_payment_error.as_ref();
                        warn!(
                            event_id = %event.id,
                            payment_intent_id = %intent.id,
                            customer = intent.customer.as_deref().unwrap_or("unknown"),
                            code = failure.and_then(|f| f.code.as_deref()).unwrap_or("unknown"),
                            message = failure.and_then(|f| f.message.as_deref()).unwrap_or("none"),
                            "Payment failed"
                        );
                    }
                    Err(e) => {
                        warn!(event_id = %event.id, error = %e, "Payment failed event with unreadable payment intent");
                    }
                }
                metrics::counter!("webhook.payment_failed").increment(1);
                Ok(())
            }
            EventKind::Other(event_type) => {
                info!(event_id = %event.id, %event_type, "Ignoring unhandled webhook event type");
                metrics::counter!("webhook.ignored").increment(1);
                Ok(())
            }
        }
    }

    /// Record the failure. A permanent failure that reaches the threshold is
    /// dead-lettered and reported as handled so Stripe stops redelivering it.
    async fn handle_failure(&self, event: &WebhookEvent, err: anyhow::Error) -> Result<()> {
        let message = format!("{:#}", err);
        let permanent = is_permanent_failure(&err);

        match self.ledger.record_failure(event, &message).await {
            Ok(failure_count) if permanent && failure_count >= self.dead_letter_after => {
                match self.ledger.mark_dead_lettered(&event.id).await {
                    Ok(()) => {
                        error!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            failure_count,
                            error = %message,
                            "Webhook event dead-lettered after repeated failures"
                        );
                        metrics::counter!("webhook.dead_lettered").increment(1);
                        return Ok(());
                    }
                    Err(e) => {
                        error!(
                            event_id = %event.id,
                            error = %e,
                            "Failed to dead-letter webhook event"
                        );
                    }
                }
            }
            Ok(failure_count) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    failure_count,
                    limit = self.dead_letter_after,
                    permanent,
                    "Recorded webhook processing failure"
                );
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    error = %e,
                    "Failed to record webhook processing failure"
                );
            }
        }

        Err(err)
    }
}

#[async_trait]
impl JobHandler for WebhookEventProcessor {
    async fn handle(&self, event: &WebhookEvent) -> Result<()> {
        match AssertUnwindSafe(self.dispatch(event)).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => self.handle_failure(event, e).await,
            Err(payload) => {
                let panic = HandlerPanic(panic_message(payload.as_ref()));
                self.handle_failure(event, panic.into()).await
            }
        }
    }
}
