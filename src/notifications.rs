//! Purchase confirmation emails.
//!
//! Sending is best-effort: every failure is logged and reported as `false`,
//! never propagated to the checkout flow.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::email::{MailTransport, OutgoingEmail, get_staging_prefix};
use crate::profiles::UserDirectory;
use crate::stripe_events::PurchasedItem;

/// Everything needed to render a confirmation for one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseConfirmation {
    pub order_id: Uuid,
    pub user_id: String,
    pub items: Vec<PurchasedItem>,
    pub total_cents: i64,
    pub currency: String,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    directory: Arc<dyn UserDirectory>,
    transport: Arc<dyn MailTransport>,
    base_url: String,
}

impl NotificationDispatcher {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        transport: Arc<dyn MailTransport>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            transport,
            base_url: base_url.into(),
        }
    }

    /// Returns true only when the transport accepted the message
    pub async fn send_purchase_confirmation(&self, confirmation: &PurchaseConfirmation) -> bool {
        let contact = match self.directory.find_contact(&confirmation.user_id).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                warn!(
                    user_id = %confirmation.user_id,
                    order_id = %confirmation.order_id,
                    "No profile for purchaser, skipping confirmation email"
                );
                metrics::counter!("notifications.failed", "reason" => "no_profile").increment(1);
                return false;
            }
            Err(e) => {
                warn!(
                    user_id = %confirmation.user_id,
                    order_id = %confirmation.order_id,
                    error = %e,
                    "Failed to look up purchaser contact"
                );
                metrics::counter!("notifications.failed", "reason" => "lookup").increment(1);
                return false;
            }
        };

        let Some(to_email) = contact.email.filter(|e| !e.trim().is_empty()) else {
            warn!(
                user_id = %confirmation.user_id,
                order_id = %confirmation.order_id,
                "Purchaser has no email address, skipping confirmation email"
            );
            metrics::counter!("notifications.failed", "reason" => "no_email").increment(1);
            return false;
        };

        let to_name = contact.display_name.unwrap_or_default();
        let email = render_purchase_confirmation(confirmation, to_email, to_name, &self.base_url);

        match self.transport.send(email).await {
            Ok(()) => {
                info!(
                    user_id = %confirmation.user_id,
                    order_id = %confirmation.order_id,
                    "Sent purchase confirmation"
                );
                metrics::counter!("notifications.sent").increment(1);
                true
            }
            Err(e) => {
                warn!(
                    user_id = %confirmation.user_id,
                    order_id = %confirmation.order_id,
                    error = %e,
                    "Failed to send purchase confirmation"
                );
                metrics::counter!("notifications.failed", "reason" => "transport").increment(1);
                false
            }
        }
    }
}

/// Format integer cents as a currency string, e.g. 2000 -> "$20.00".
/// Non-USD currencies get their code appended.
pub fn format_cents(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let amount = format!("{}${}.{:02}", sign, abs / 100, abs % 100);
    if currency.is_empty() || currency.eq_ignore_ascii_case("usd") {
        amount
    } else {
        format!("{} {}", amount, currency.to_uppercase())
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn item_label(item: &PurchasedItem) -> &str {
    item.product_name.as_deref().unwrap_or(&item.product_id)
}

fn render_purchase_confirmation(
    confirmation: &PurchaseConfirmation,
    to_email: String,
    to_name: String,
    base_url: &str,
) -> OutgoingEmail {
    let subject = format!(
        "{}Your Battle Damage Studios order is confirmed",
        get_staging_prefix()
    );
    let currency = confirmation.currency.as_str();
    let total = format_cents(confirmation.total_cents, currency);
    let orders_url = format!("{}/orders/{}", base_url.trim_end_matches('/'), confirmation.order_id);
    let greeting = if to_name.is_empty() {
        "Hi,".to_string()
    } else {
        format!("Hi {},", to_name)
    };

    let mut text_lines = String::new();
    let mut html_rows = String::new();
    for item in &confirmation.items {
        let unit = format_cents(item.unit_price_cents, currency);
        let line = item
            .line_total_cents()
            .map(|cents| format_cents(cents, currency))
            .unwrap_or_else(|| "n/a".to_string());
        text_lines.push_str(&format!(
            "  {} x {} @ {} = {}\n",
            item.quantity,
            item_label(item),
            unit,
            line
        ));
        html_rows.push_str(&format!(
            "<tr><td>{}</td><td style=\"text-align:right\">{}</td><td style=\"text-align:right\">{}</td><td style=\"text-align:right\">{}</td></tr>",
            html_escape(item_label(item)),
            item.quantity,
            unit,
            line
        ));
    }

    let text_body = format!(
        "{greeting}\n\n\
         Thanks for your purchase! Here is a summary of your order {order_id}:\n\n\
         {text_lines}\n\
         Total: {total}\n\n\
         You can view your order at {orders_url}\n\n\
         Battle Damage Studios\n",
        order_id = confirmation.order_id,
    );

    let html_body = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #222;">
<p>{greeting}</p>
<p>Thanks for your purchase! Here is a summary of your order <strong>{order_id}</strong>:</p>
<table cellpadding="6" style="border-collapse: collapse;">
<thead><tr><th style="text-align:left">Item</th><th>Qty</th><th>Unit price</th><th>Subtotal</th></tr></thead>
<tbody>{html_rows}</tbody>
<tfoot><tr><td colspan="3" style="text-align:right"><strong>Total</strong></td><td style="text-align:right"><strong>{total}</strong></td></tr></tfoot>
</table>
<p><a href="{orders_url}">View your order</a></p>
<p>Battle Damage Studios</p>
</body>
</html>"#,
        greeting = html_escape(&greeting),
        order_id = confirmation.order_id,
        orders_url = html_escape(&orders_url),
    );

    OutgoingEmail {
        to_email,
        to_name,
        subject,
        text_body,
        html_body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::UserContact;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedDirectory(Result<Option<UserContact>, String>);

    #[async_trait]
    impl UserDirectory for FixedDirectory {
        async fn find_contact(&self, _user_id: &str) -> Result<Option<UserContact>> {
            self.0.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<OutgoingEmail>>,
        fail: bool,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, email: OutgoingEmail) -> Result<()> {
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        }
    }

    fn confirmation() -> PurchaseConfirmation {
        PurchaseConfirmation {
            order_id: Uuid::nil(),
            user_id: "u1".to_string(),
            items: vec![PurchasedItem {
                product_id: "p1".to_string(),
                product_name: Some("Ork <Trukk>".to_string()),
                quantity: 2,
                unit_price_cents: 1000,
            }],
            total_cents: 2000,
            currency: "usd".to_string(),
        }
    }

    fn contact() -> UserContact {
        UserContact {
            email: Some("buyer@example.com".to_string()),
            display_name: Some("Buyer".to_string()),
        }
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(2000, "usd"), "$20.00");
        assert_eq!(format_cents(1999, "USD"), "$19.99");
        assert_eq!(format_cents(5, ""), "$0.05");
        assert_eq!(format_cents(-250, "usd"), "-$2.50");
        assert_eq!(format_cents(1000, "eur"), "$10.00 EUR");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[tokio::test]
    async fn test_sends_rendered_summary() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(FixedDirectory(Ok(Some(contact())))),
            transport.clone(),
            "https://shop.example.com/",
        );

        assert!(dispatcher.send_purchase_confirmation(&confirmation()).await);

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let email = &sent[0];
        assert_eq!(email.to_email, "buyer@example.com");
        assert_eq!(email.to_name, "Buyer");
        assert!(email.subject.contains("order is confirmed"));
        assert!(email.text_body.contains("Total: $20.00"));
        assert!(email.text_body.contains("2 x Ork <Trukk> @ $10.00 = $20.00"));
        assert!(email.html_body.contains("Ork &lt;Trukk&gt;"));
        assert!(
            email
                .text_body
                .contains("https://shop.example.com/orders/00000000-0000-0000-0000-000000000000")
        );
    }

    #[tokio::test]
    async fn test_missing_contact_returns_false() {
        let transport = Arc::new(RecordingTransport::default());
        for directory in [
            FixedDirectory(Ok(None)),
            FixedDirectory(Ok(Some(UserContact {
                email: None,
                display_name: Some("Buyer".to_string()),
            }))),
            FixedDirectory(Err("database down".to_string())),
        ] {
            let dispatcher =
                NotificationDispatcher::new(Arc::new(directory), transport.clone(), "");
            assert!(!dispatcher.send_purchase_confirmation(&confirmation()).await);
        }
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_returns_false() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let dispatcher = NotificationDispatcher::new(
            Arc::new(FixedDirectory(Ok(Some(contact())))),
            transport,
            "",
        );
        assert!(!dispatcher.send_purchase_confirmation(&confirmation()).await);
    }

    #[tokio::test]
    async fn test_unrepresentable_line_total_still_sends() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = NotificationDispatcher::new(
            Arc::new(FixedDirectory(Ok(Some(contact())))),
            transport.clone(),
            "",
        );
        let mut confirmation = confirmation();
        confirmation.items[0].unit_price_cents = i64::MAX;

        assert!(dispatcher.send_purchase_confirmation(&confirmation).await);
        let sent = transport.sent.lock().unwrap();
        assert!(sent[0].text_body.contains("= n/a"));
    }
}
