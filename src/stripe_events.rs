//! Typed views over Stripe webhook deliveries.
//!
//! Only the fields the pipeline reads are modelled; everything else in the
//! delivery is carried along as raw JSON in [`WebhookEvent::data`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const PAYMENT_INTENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// A verified webhook delivery. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Event type discriminator for the types this service acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    PaymentFailed,
    Other(String),
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            CHECKOUT_SESSION_COMPLETED => Self::CheckoutCompleted,
            PAYMENT_INTENT_PAYMENT_FAILED => Self::PaymentFailed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckoutCompleted => f.write_str(CHECKOUT_SESSION_COMPLETED),
            Self::PaymentFailed => f.write_str(PAYMENT_INTENT_PAYMENT_FAILED),
            Self::Other(t) => f.write_str(t),
        }
    }
}

impl WebhookEvent {
    pub fn from_slice(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event_type)
    }

    /// Interpret `data.object` as a Checkout Session
    pub fn checkout_session(&self) -> Result<CheckoutSession, MetadataError> {
        serde_json::from_value(self.data.object.clone())
            .map_err(|e| MetadataError::MalformedSession(e.to_string()))
    }

    /// Interpret `data.object` as a Payment Intent
    pub fn payment_intent(&self) -> serde_json::Result<PaymentIntentSummary> {
        serde_json::from_value(self.data.object.clone())
    }
}

/// Subset of a Stripe Checkout Session object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Total in the currency's minor unit (cents)
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntentSummary {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Data-integrity faults in the checkout metadata written by the storefront
#[derive(Debug, Error, PartialEq)]
pub enum MetadataError {
    #[error("checkout session could not be parsed: {0}")]
    MalformedSession(String),
    #[error("checkout session {0} has no user id in its metadata")]
    MissingUserId(String),
    #[error("checkout session {0} has no items in its metadata")]
    MissingItems(String),
    #[error("checkout session {session_id} has unparsable items: {reason}")]
    InvalidItems { session_id: String, reason: String },
    #[error("checkout session {session_id} has an invalid order total ({amount_total:?})")]
    InvalidTotal {
        session_id: String,
        amount_total: Option<i64>,
    },
}

/// One purchased line item, as recorded in checkout metadata
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataLineItem {
    #[serde(alias = "productId", alias = "product_id")]
    pub product: String,
    #[serde(alias = "quantity")]
    pub qty: i32,
    /// Unit price in major units (dollars)
    #[serde(alias = "unitPrice", alias = "unit_price")]
    pub price: f64,
    #[serde(default)]
    pub name: Option<String>,
}

/// A validated line item with the price converted to cents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchasedItem {
    pub product_id: String,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

impl PurchasedItem {
    /// `None` when the product does not fit in an `i64`
    pub fn line_total_cents(&self) -> Option<i64> {
        self.unit_price_cents.checked_mul(i64::from(self.quantity))
    }
}

/// Sum of all line totals; `None` on overflow
pub fn items_total_cents(items: &[PurchasedItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |total, item| total.checked_add(item.line_total_cents()?))
}

/// Business data extracted from a completed checkout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutDetails {
    pub user_id: String,
    pub items: Vec<PurchasedItem>,
}

/// Largest unit price accepted from metadata: $1,000,000.00
pub const MAX_UNIT_PRICE_CENTS: i64 = 100_000_000;

fn dollars_to_cents(price: f64) -> Option<i64> {
    if !price.is_finite() || price < 0.0 {
        return None;
    }
    let cents = (price * 100.0).round();
    if cents > MAX_UNIT_PRICE_CENTS as f64 {
        return None;
    }
    Some(cents as i64)
}

impl CheckoutSession {
    /// Extract and validate the user id and line items from metadata.
    ///
    /// Nothing is written before this succeeds.
    pub fn details(&self) -> Result<CheckoutDetails, MetadataError> {
        let user_id = self
            .metadata
            .get("userId")
            .or_else(|| self.metadata.get("user_id"))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MetadataError::MissingUserId(self.id.clone()))?
            .to_string();

        let raw_items = self
            .metadata
            .get("items")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MetadataError::MissingItems(self.id.clone()))?;

        let invalid = |reason: String| MetadataError::InvalidItems {
            session_id: self.id.clone(),
            reason,
        };

        let parsed: Vec<MetadataLineItem> =
            serde_json::from_str(raw_items).map_err(|e| invalid(e.to_string()))?;

        if parsed.is_empty() {
            return Err(MetadataError::MissingItems(self.id.clone()));
        }

        let items = parsed
            .into_iter()
            .map(|item| {
                if item.product.trim().is_empty() {
                    return Err(invalid("line item without a product id".to_string()));
                }
                if item.qty < 1 {
                    return Err(invalid(format!(
                        "quantity {} for product {}",
                        item.qty, item.product
                    )));
                }
                let unit_price_cents = dollars_to_cents(item.price).ok_or_else(|| {
                    invalid(format!("price {} for product {}", item.price, item.product))
                })?;
                Ok(PurchasedItem {
                    product_id: item.product,
                    product_name: item.name,
                    quantity: item.qty,
                    unit_price_cents,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if items_total_cents(&items).is_none() {
            return Err(invalid("line item totals overflow".to_string()));
        }

        Ok(CheckoutDetails { user_id, items })
    }

    /// Order total in cents. Falls back to the sum of line items when Stripe
    /// did not report `amount_total`.
    pub fn total_cents(&self, items: &[PurchasedItem]) -> Result<i64, MetadataError> {
        let total = match self.amount_total {
            Some(amount) => Some(amount),
            None => items_total_cents(items),
        };
        total
            .filter(|cents| *cents >= 0)
            .ok_or_else(|| MetadataError::InvalidTotal {
                session_id: self.id.clone(),
                amount_total: self.amount_total,
            })
    }
}
