use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[db_enum(existing_type_path = "crate::schema::sql_types::OrderPaymentStatus")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[db_enum(rename = "paid")]
    Paid,
    #[db_enum(rename = "unpaid")]
    Unpaid,
    #[db_enum(rename = "no_payment_required")]
    NoPaymentRequired,
}

impl PaymentStatus {
    /// Map Stripe's Checkout Session `payment_status`. A completed session
    /// without a status is treated as paid.
    pub fn from_stripe(status: Option<&str>) -> Self {
        match status {
            Some("unpaid") => Self::Unpaid,
            Some("no_payment_required") => Self::NoPaymentRequired,
            _ => Self::Paid,
        }
    }
}

/// Diesel model for the orders table
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub total_price_cents: i64,
    pub currency: String,
    pub stripe_checkout_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert model for new orders
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewOrder {
    pub user_id: String,
    pub total_price_cents: i64,
    pub currency: String,
    pub stripe_checkout_id: String,
    pub stripe_payment_intent_id: Option<String>,
    pub payment_status: PaymentStatus,
}

/// Diesel model for the order_items table
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// A line item waiting for its order id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderLine {
    pub product_id: String,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewOrderItem {
    pub order_id: Uuid,
    pub product_id: String,
    pub product_name: Option<String>,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

impl NewOrderItem {
    pub fn for_order(order_id: Uuid, line: NewOrderLine) -> Self {
        Self {
            order_id,
            product_id: line.product_id,
            product_name: line.product_name,
            quantity: line.quantity,
            unit_price_cents: line.unit_price_cents,
        }
    }
}

/// Orders and their line items.
///
/// `create_with_items` is all-or-nothing: either the order and every line
/// item are stored, or nothing is. It returns `None` when an order for the
/// same checkout id already exists.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_checkout_id(&self, stripe_checkout_id: &str) -> Result<Option<Order>>;

    async fn create_with_items(
        &self,
        order: NewOrder,
        lines: Vec<NewOrderLine>,
    ) -> Result<Option<(Order, Vec<OrderItem>)>>;
}
