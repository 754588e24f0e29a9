//! Common test utilities for webhook pipeline integration tests
//!
//! `MemoryStore` implements every storage trait the pipeline uses, so the
//! full router can be driven end to end without PostgreSQL. Write paths
//! track how many callers are inside them at once so tests can check that
//! the queue really serializes work.

#![allow(dead_code)]

pub mod database;

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use bds_webhooks::checkout::CheckoutCompletionHandler;
use bds_webhooks::email::{MailTransport, OutgoingEmail};
use bds_webhooks::notifications::NotificationDispatcher;
use bds_webhooks::orders::{NewOrder, NewOrderLine, Order, OrderItem, OrderStore};
use bds_webhooks::processed_events::{ProcessedEventLedger, ProcessedEventRecord};
use bds_webhooks::profiles::{UserContact, UserDirectory, UserStats};
use bds_webhooks::queue_config::QueueConfig;
use bds_webhooks::signature::SignatureVerifier;
use bds_webhooks::stripe_events::WebhookEvent;
use bds_webhooks::web::{AppState, router};
use bds_webhooks::webhook_config::AckMode;
use bds_webhooks::webhook_processor::WebhookEventProcessor;
use bds_webhooks::webhook_queue::WebhookQueue;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub contact: UserContact,
    pub total_spent_cents: i64,
    pub order_count: i32,
}

#[derive(Debug, Clone, Default)]
pub struct FailureRow {
    pub failure_count: i32,
    pub last_error: String,
    pub dead_lettered: bool,
}

#[derive(Default)]
struct Tables {
    orders: Vec<Order>,
    items: Vec<OrderItem>,
    profiles: HashMap<String, ProfileRow>,
    processed: Vec<ProcessedEventRecord>,
    failures: HashMap<String, FailureRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    writers: AtomicUsize,
    max_writers: AtomicUsize,
    pub fail_item_insert: AtomicBool,
    pub fail_stats: AtomicBool,
    pub fail_mark_processed: AtomicBool,
    pub fail_ledger_reads: AtomicBool,
}

/// Tracks concurrent writers for the lifetime of the guard
struct WriteGuard<'a>(&'a MemoryStore);

impl<'a> WriteGuard<'a> {
    fn enter(store: &'a MemoryStore) -> Self {
        let now = store.writers.fetch_add(1, Ordering::SeqCst) + 1;
        store.max_writers.fetch_max(now, Ordering::SeqCst);
        Self(store)
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0.writers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    pub fn with_profile(user_id: &str, email: Option<&str>, name: Option<&str>) -> Self {
        let store = Self::default();
        store.add_profile(user_id, email, name);
        store
    }

    pub fn add_profile(&self, user_id: &str, email: Option<&str>, name: Option<&str>) {
        self.tables.lock().unwrap().profiles.insert(
            user_id.to_string(),
            ProfileRow {
                contact: UserContact {
                    email: email.map(str::to_string),
                    display_name: name.map(str::to_string),
                },
                total_spent_cents: 0,
                order_count: 0,
            },
        );
    }

    pub fn orders(&self) -> Vec<Order> {
        self.tables.lock().unwrap().orders.clone()
    }

    pub fn items(&self) -> Vec<OrderItem> {
        self.tables.lock().unwrap().items.clone()
    }

    pub fn profile(&self, user_id: &str) -> Option<ProfileRow> {
        self.tables.lock().unwrap().profiles.get(user_id).cloned()
    }

    pub fn processed(&self) -> Vec<ProcessedEventRecord> {
        self.tables.lock().unwrap().processed.clone()
    }

    pub fn processed_ids(&self) -> Vec<String> {
        self.processed().into_iter().map(|r| r.event_id).collect()
    }

    pub fn failure(&self, event_id: &str) -> Option<FailureRow> {
        self.tables.lock().unwrap().failures.get(event_id).cloned()
    }

    pub fn max_concurrent_writers(&self) -> usize {
        self.max_writers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_by_checkout_id(&self, stripe_checkout_id: &str) -> Result<Option<Order>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .orders
            .iter()
            .find(|o| o.stripe_checkout_id == stripe_checkout_id)
            .cloned())
    }

    async fn create_with_items(
        &self,
        new_order: NewOrder,
        lines: Vec<NewOrderLine>,
    ) -> Result<Option<(Order, Vec<OrderItem>)>> {
        let _guard = WriteGuard::enter(self);
        // Widen the window in which overlapping jobs would be visible
        tokio::time::sleep(Duration::from_millis(2)).await;

        let mut tables = self.tables.lock().unwrap();
        if tables
            .orders
            .iter()
            .any(|o| o.stripe_checkout_id == new_order.stripe_checkout_id)
        {
            return Ok(None);
        }

        let order = Order {
            id: Uuid::new_v4(),
            user_id: new_order.user_id,
            total_price_cents: new_order.total_price_cents,
            currency: new_order.currency,
            stripe_checkout_id: new_order.stripe_checkout_id,
            stripe_payment_intent_id: new_order.stripe_payment_intent_id,
            payment_status: new_order.payment_status,
            created_at: Utc::now(),
        };

        // Rolled back: neither the order nor any item is kept
        if self.fail_item_insert.load(Ordering::SeqCst) {
            anyhow::bail!("insert into order_items failed");
        }

        let items: Vec<OrderItem> = lines
            .into_iter()
            .map(|line| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                product_id: line.product_id,
                product_name: line.product_name,
                quantity: line.quantity,
                unit_price_cents: line.unit_price_cents,
                created_at: Utc::now(),
            })
            .collect();

        tables.orders.push(order.clone());
        tables.items.extend(items.iter().cloned());
        Ok(Some((order, items)))
    }
}

#[async_trait]
impl UserStats for MemoryStore {
    async fn increment_spend(&self, user_id: &str, amount_cents: i64) -> Result<bool> {
        let _guard = WriteGuard::enter(self);
        if self.fail_stats.load(Ordering::SeqCst) {
            anyhow::bail!("profile update failed");
        }
        let mut tables = self.tables.lock().unwrap();
        Ok(match tables.profiles.get_mut(user_id) {
            Some(profile) => {
                profile.total_spent_cents += amount_cents;
                profile.order_count += 1;
                true
            }
            None => false,
        })
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_contact(&self, user_id: &str) -> Result<Option<UserContact>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .profiles
            .get(user_id)
            .map(|p| p.contact.clone()))
    }
}

#[async_trait]
impl ProcessedEventLedger for MemoryStore {
    async fn has_processed(&self, event_id: &str) -> Result<bool> {
        if self.fail_ledger_reads.load(Ordering::SeqCst) {
            anyhow::bail!("ledger unavailable");
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .processed
            .iter()
            .any(|r| r.event_id == event_id))
    }

    async fn mark_processed(&self, event_id: &str, event_type: &str) -> Result<()> {
        let _guard = WriteGuard::enter(self);
        if self.fail_mark_processed.load(Ordering::SeqCst) {
            anyhow::bail!("ledger write failed");
        }
        let mut tables = self.tables.lock().unwrap();
        if !tables.processed.iter().any(|r| r.event_id == event_id) {
            tables.processed.push(ProcessedEventRecord {
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                processed_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn record_failure(&self, event: &WebhookEvent, error: &str) -> Result<i32> {
        let mut tables = self.tables.lock().unwrap();
        let row = tables.failures.entry(event.id.clone()).or_default();
        row.failure_count += 1;
        row.last_error = error.to_string();
        Ok(row.failure_count)
    }

    async fn mark_dead_lettered(&self, event_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables
            .failures
            .entry(event_id.to_string())
            .or_default()
            .dead_lettered = true;
        Ok(())
    }

    async fn is_dead_lettered(&self, event_id: &str) -> Result<bool> {
        if self.fail_ledger_reads.load(Ordering::SeqCst) {
            anyhow::bail!("ledger unavailable");
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .failures
            .get(event_id)
            .is_some_and(|f| f.dead_lettered))
    }
}

/// Mail transport that keeps every message, or fails on demand
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("SMTP connection refused");
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
    pub queue: WebhookQueue,
    pub verifier: SignatureVerifier,
}

impl TestApp {
    pub fn new(store: MemoryStore) -> Self {
        Self::build(store, AckMode::AfterProcessing, 5)
    }

    pub fn build(store: MemoryStore, ack_mode: AckMode, dead_letter_after: i32) -> Self {
        let store = Arc::new(store);
        let mailer = Arc::new(RecordingMailer::default());
        let verifier = SignatureVerifier::new(WEBHOOK_SECRET, 300);

        let dispatcher =
            NotificationDispatcher::new(store.clone(), mailer.clone(), "https://shop.example.com");
        let checkout =
            CheckoutCompletionHandler::new(store.clone(), store.clone(), dispatcher, store.clone());
        let processor = WebhookEventProcessor::new(checkout, store.clone(), dead_letter_after);
        let (queue, _worker) = WebhookQueue::start(
            Arc::new(processor),
            QueueConfig::with_interval(Duration::ZERO),
        );

        let state = AppState {
            verifier: Arc::new(verifier.clone()),
            ledger: store.clone(),
            queue: queue.clone(),
            ack_mode,
            metrics: None,
        };

        Self {
            router: router(state),
            store,
            mailer,
            queue,
            verifier,
        }
    }

    /// POST a correctly signed delivery
    pub async fn deliver(&self, payload: &Value) -> (u16, Value) {
        let body = payload.to_string();
        let signature = self.verifier.sign(body.as_bytes(), Utc::now().timestamp());
        self.post_webhook(body, Some(signature)).await
    }

    pub async fn post_webhook(&self, body: String, signature: Option<String>) -> (u16, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/stripe/webhooks")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header("Stripe-Signature", signature);
        }
        let request = request.body(Body::from(body)).unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (u16, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (u16, Value) {
        use tower::ServiceExt;

        let response: Response<Body> = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

/// A `checkout.session.completed` event as Stripe would deliver it
pub fn checkout_completed(
    event_id: &str,
    checkout_id: &str,
    metadata: Value,
    amount_total: Option<i64>,
) -> Value {
    json!({
        "id": event_id,
        "object": "event",
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "livemode": false,
        "data": {
            "object": {
                "id": checkout_id,
                "object": "checkout.session",
                "payment_intent": format!("pi_{checkout_id}"),
                "amount_total": amount_total,
                "currency": "usd",
                "payment_status": "paid",
                "metadata": metadata,
            }
        }
    })
}

pub fn items_metadata(user_id: &str, items: Value) -> Value {
    json!({
        "userId": user_id,
        "items": items.to_string(),
    })
}

/// Poll until `check` passes or two seconds elapse
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
