use anyhow::Result;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
    message::{Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::{authentication::Credentials, client::TlsParametersBuilder},
};
use tracing::info;

/// Returns "[STAGING] " if BDS_ENV=staging, empty string otherwise
pub fn get_staging_prefix() -> &'static str {
    match std::env::var("BDS_ENV").unwrap_or_default().as_str() {
        "staging" => "[STAGING] ",
        _ => "",
    }
}

/// A rendered message ready for a [`MailTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Outbound transactional email
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<()>;
}

#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self> {
        let smtp_server = std::env::var("SMTP_SERVER")
            .map_err(|_| anyhow::anyhow!("SMTP_SERVER environment variable not set"))?;

        let smtp_port: u16 = std::env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid SMTP_PORT"))?;

        let smtp_username = std::env::var("SMTP_USERNAME")
            .map_err(|_| anyhow::anyhow!("SMTP_USERNAME environment variable not set"))?;

        let smtp_password = std::env::var("SMTP_PASSWORD")
            .map_err(|_| anyhow::anyhow!("SMTP_PASSWORD environment variable not set"))?;

        let from_email = std::env::var("FROM_EMAIL")
            .map_err(|_| anyhow::anyhow!("FROM_EMAIL environment variable not set"))?;

        let from_name =
            std::env::var("FROM_NAME").unwrap_or_else(|_| "Battle Damage Studios".to_string());

        Ok(Self {
            smtp_server,
            smtp_port,
            smtp_username,
            smtp_password,
            from_email,
            from_name,
        })
    }
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_email", &self.from_email)
            .field("from_name", &self.from_name)
            .finish()
    }
}

/// Create a properly formatted Mailbox with display name
fn create_mailbox(name: &str, email: &str) -> Result<Mailbox> {
    let address = email.parse()?;
    let name = Some(name.to_string()).filter(|n| !n.is_empty());
    Ok(Mailbox::new(name, address))
}

pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let creds = Credentials::new(config.smtp_username, config.smtp_password);
        let smtp_server = config.smtp_server;
        let smtp_port = config.smtp_port;

        // - Port 1025: Insecure (Mailpit for local testing)
        // - Port 465: Implicit TLS
        // - Port 587 and others: STARTTLS
        let mailer = if smtp_port == 1025 {
            info!("Using insecure SMTP connection for port 1025 (Mailpit) without TLS");
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_server)
                .port(smtp_port)
                .tls(lettre::transport::smtp::client::Tls::None)
                .build()
        } else if smtp_port == 465 {
            info!("Using implicit TLS (SMTPS) for port 465");
            let tls_params = TlsParametersBuilder::new(smtp_server.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create TLS parameters: {}", e))?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_server)?
                .port(smtp_port)
                .credentials(creds)
                .tls(lettre::transport::smtp::client::Tls::Wrapper(tls_params))
                .build()
        } else {
            info!("Using STARTTLS for port {}", smtp_port);
            let tls_params = TlsParametersBuilder::new(smtp_server.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to create TLS parameters: {}", e))?;
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_server)?
                .port(smtp_port)
                .credentials(creds)
                .tls(lettre::transport::smtp::client::Tls::Required(tls_params))
                .build()
        };

        Ok(Self {
            mailer,
            from_email: config.from_email,
            from_name: config.from_name,
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        let message = Message::builder()
            .from(create_mailbox(&self.from_name, &self.from_email)?)
            .to(create_mailbox(&email.to_name, &email.to_email)?)
            .subject(email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(email.text_body))
                    .singlepart(SinglePart::html(email.html_body)),
            )?;

        let response = self.mailer.send(message).await?;
        if !response.is_positive() {
            anyhow::bail!("SMTP server rejected message: {:?}", response.code());
        }
        Ok(())
    }
}

/// Transport used when SMTP is not configured; every send fails
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMailer;

#[async_trait]
impl MailTransport for DisabledMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        anyhow::bail!(
            "email transport is not configured; dropping '{}' to {}",
            email.subject,
            email.to_email
        )
    }
}
