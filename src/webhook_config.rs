use anyhow::Result;
use std::str::FromStr;

use crate::signature::DEFAULT_TOLERANCE_SECS;

pub const DEFAULT_DEAD_LETTER_AFTER: i32 = 5;

/// When the HTTP endpoint acknowledges a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Wait for the job; 500 on failure so Stripe redelivers
    #[default]
    AfterProcessing,
    /// Acknowledge as soon as the job is queued
    OnEnqueue,
}

impl FromStr for AckMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after_processing" => Ok(Self::AfterProcessing),
            "on_enqueue" => Ok(Self::OnEnqueue),
            other => anyhow::bail!(
                "Invalid WEBHOOK_ACK_MODE '{}', expected after_processing or on_enqueue",
                other
            ),
        }
    }
}

#[derive(Clone)]
pub struct WebhookConfig {
    pub signing_secret: String,
    pub tolerance_secs: i64,
    pub ack_mode: AckMode,
    /// Failures after which an event is dead-lettered
    pub dead_letter_after: i32,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("signing_secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .field("ack_mode", &self.ack_mode)
            .field("dead_letter_after", &self.dead_letter_after)
            .finish()
    }
}

impl WebhookConfig {
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
            ack_mode: AckMode::default(),
            dead_letter_after: DEFAULT_DEAD_LETTER_AFTER,
        }
    }

    pub fn from_env() -> Result<Self> {
        let signing_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| anyhow::anyhow!("STRIPE_WEBHOOK_SECRET environment variable not set"))?;
        if signing_secret.trim().is_empty() {
            anyhow::bail!("STRIPE_WEBHOOK_SECRET is empty");
        }

        let tolerance_secs = match std::env::var("STRIPE_WEBHOOK_TOLERANCE_SECS") {
            Ok(v) => v
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid STRIPE_WEBHOOK_TOLERANCE_SECS"))?,
            Err(_) => DEFAULT_TOLERANCE_SECS,
        };

        let ack_mode = match std::env::var("WEBHOOK_ACK_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => AckMode::default(),
        };

        let dead_letter_after = match std::env::var("WEBHOOK_DEAD_LETTER_AFTER") {
            Ok(v) => v
                .parse::<i32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| anyhow::anyhow!("Invalid WEBHOOK_DEAD_LETTER_AFTER"))?,
            Err(_) => DEFAULT_DEAD_LETTER_AFTER,
        };

        Ok(Self {
            signing_secret,
            tolerance_secs,
            ack_mode,
            dead_letter_after,
        })
    }
}
