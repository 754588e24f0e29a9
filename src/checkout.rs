//! Turns a completed Stripe Checkout Session into an order.
//!
//! Steps, in order:
//! 1. skip if an order for the checkout id already exists
//! 2. validate metadata (nothing is written if this fails)
//! 3. insert the order and its items in one transaction
//! 4. bump the purchaser's spend stats (best effort)
//! 5. send the confirmation email (best effort)
//! 6. mark the event processed (failure logged, not fatal)

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::notifications::{NotificationDispatcher, PurchaseConfirmation};
use crate::orders::{NewOrder, NewOrderLine, OrderItem, OrderStore, PaymentStatus};
use crate::processed_events::ProcessedEventLedger;
use crate::profiles::UserStats;
use crate::stripe_events::{MetadataError, WebhookEvent};

const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("failed to look up order for checkout {checkout_id}: {cause:#}")]
    Lookup {
        checkout_id: String,
        cause: anyhow::Error,
    },
    #[error("failed to record order for checkout {checkout_id}: {cause:#}")]
    Persist {
        checkout_id: String,
        cause: anyhow::Error,
    },
}

impl CheckoutError {
    /// Faults in the data Stripe sent us, as opposed to our own storage
    pub fn is_data_fault(&self) -> bool {
        matches!(self, Self::Metadata(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    /// An order for this checkout id was already stored; nothing was done
    AlreadyRecorded { stripe_checkout_id: String },
    Recorded {
        order_id: Uuid,
        items: Vec<OrderItem>,
        stats_updated: bool,
        notified: bool,
    },
}

#[derive(Clone)]
pub struct CheckoutCompletionHandler {
    orders: Arc<dyn OrderStore>,
    stats: Arc<dyn UserStats>,
    notifications: NotificationDispatcher,
    ledger: Arc<dyn ProcessedEventLedger>,
}

impl CheckoutCompletionHandler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        stats: Arc<dyn UserStats>,
        notifications: NotificationDispatcher,
        ledger: Arc<dyn ProcessedEventLedger>,
    ) -> Self {
        Self {
            orders,
            stats,
            notifications,
            ledger,
        }
    }

    pub async fn handle(&self, event: &WebhookEvent) -> Result<CheckoutOutcome, CheckoutError> {
        let session = event.checkout_session()?;

        let existing = self
            .orders
            .find_by_checkout_id(&session.id)
            .await
            .map_err(|cause| CheckoutError::Lookup {
                checkout_id: session.id.clone(),
                cause,
            })?;

        if let Some(order) = existing {
            info!(
                event_id = %event.id,
                checkout_id = %session.id,
                order_id = %order.id,
                "Order already recorded for checkout, skipping"
            );
            metrics::counter!("checkout.duplicates").increment(1);
            return Ok(CheckoutOutcome::AlreadyRecorded {
                stripe_checkout_id: session.id,
            });
        }

        let details = session.details()?;
        let total_cents = session.total_cents(&details.items)?;
        let currency = session
            .currency
            .clone()
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        let new_order = NewOrder {
            user_id: details.user_id.clone(),
            total_price_cents: total_cents,
            currency: currency.clone(),
            stripe_checkout_id: session.id.clone(),
            stripe_payment_intent_id: session.payment_intent.clone(),
            payment_status: PaymentStatus::from_stripe(session.payment_status.as_deref()),
        };
        let lines = details
            .items
            .iter()
            .map(|item| NewOrderLine {
                product_id: item.product_id.clone(),
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
            })
            .collect();

        let created = self
            .orders
            .create_with_items(new_order, lines)
            .await
            .map_err(|cause| CheckoutError::Persist {
                checkout_id: session.id.clone(),
                cause,
            })?;

        let Some((order, items)) = created else {
            info!(
                event_id = %event.id,
                checkout_id = %session.id,
                "Order for checkout was inserted concurrently, skipping"
            );
            metrics::counter!("checkout.duplicates").increment(1);
            return Ok(CheckoutOutcome::AlreadyRecorded {
                stripe_checkout_id: session.id,
            });
        };

        info!(
            event_id = %event.id,
            checkout_id = %session.id,
            order_id = %order.id,
            user_id = %order.user_id,
            total_cents,
            item_count = items.len(),
            "Recorded order"
        );
        metrics::counter!("checkout.orders_created").increment(1);

        let stats_updated = match self.stats.increment_spend(&order.user_id, total_cents).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(
                    user_id = %order.user_id,
                    order_id = %order.id,
                    "No profile to update with purchase stats"
                );
                false
            }
            Err(e) => {
                error!(
                    user_id = %order.user_id,
                    order_id = %order.id,
                    error = %e,
                    "Failed to update purchase stats"
                );
                false
            }
        };

        let notified = self
            .notifications
            .send_purchase_confirmation(&PurchaseConfirmation {
                order_id: order.id,
                user_id: order.user_id.clone(),
                items: details.items,
                total_cents,
                currency,
            })
            .await;

        if let Err(e) = self.ledger.mark_processed(&event.id, &event.event_type).await {
            // Redelivery stops at the existing-order check
            error!(
                event_id = %event.id,
                order_id = %order.id,
                error = %e,
                "Failed to mark webhook event as processed"
            );
        }

        Ok(CheckoutOutcome::Recorded {
            order_id: order.id,
            items,
            stats_updated,
            notified,
        })
    }
}
