//! Battle Damage Studios Stripe webhook service.
//!
//! Verifies Stripe deliveries, drops duplicates, and runs each event through
//! a single ordered worker that records orders, updates purchase stats and
//! sends confirmation emails.

pub mod actions;
pub mod checkout;
pub mod database;
pub mod email;
pub mod logging;
pub mod metrics;
pub mod notifications;
pub mod orders;
pub mod orders_repo;
pub mod processed_events;
pub mod processed_events_repo;
pub mod profiles;
pub mod profiles_repo;
pub mod queue_config;
pub mod schema;
pub mod signature;
pub mod stripe_events;
pub mod web;
pub mod webhook_config;
pub mod webhook_processor;
pub mod webhook_queue;

pub use checkout::{CheckoutCompletionHandler, CheckoutError, CheckoutOutcome};
pub use notifications::{NotificationDispatcher, PurchaseConfirmation};
pub use signature::{SignatureVerifier, VerificationError};
pub use stripe_events::{EventKind, WebhookEvent};
pub use web::AppState;
pub use webhook_processor::WebhookEventProcessor;
pub use webhook_queue::{JobHandler, JobTicket, QueueError, WebhookQueue};
