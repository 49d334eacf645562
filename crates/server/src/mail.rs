use std::sync::Arc;
use std::time::{Duration, Instant};

use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::Instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub transport: MailTransport,
    pub from_address: String,
    pub timeout_ms: u64,
}

/// Where contact messages go. `Disabled` means they are not sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailTransport {
    Disabled,
    /// JSON mail gateway endpoint with an optional bearer token.
    Http { url: String, token: Option<String> },
    Smtp(SmtpSettings),
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Upgrade the connection with STARTTLS. Off only for local relays.
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("starttls", &self.starttls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// What a visitor typed into the contact form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub sender_name: String,
    pub sender_email: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMail {
    pub from: String,
    pub to: String,
    pub reply_to: String,
    pub subject: String,
    pub text: String,
}

impl OutboundMail {
    pub fn compose(contact: &ContactMessage, from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            reply_to: contact.sender_email.clone(),
            subject: format!("Portfolio Contact from {}", contact.sender_name),
            text: format!(
                "Name: {}\nEmail: {}\n\nMessage:\n{}",
                contact.sender_name, contact.sender_email, contact.message
            ),
        }
    }

    /// RFC 5322 message for SMTP delivery. An unparsable visitor address only
    /// drops the Reply-To header.
    pub fn to_message(&self) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from)?)
            .to(parse_mailbox(&self.to)?)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        if let Ok(reply_to) = self.reply_to.parse::<Mailbox>() {
            builder = builder.reply_to(reply_to);
        }
        builder.body(self.text.clone()).map_err(MailError::Message)
    }
}

#[derive(Debug)]
pub enum MailError {
    NotConfigured,
    NoRecipient,
    Timeout,
    Http(reqwest::Error),
    BadStatus(reqwest::StatusCode),
    Address(String),
    Message(lettre::error::Error),
    Smtp(lettre::transport::smtp::Error),
}

impl MailError {
    pub fn outcome(&self) -> &'static str {
        match self {
            MailError::NotConfigured => "not_configured",
            MailError::NoRecipient => "no_recipient",
            MailError::Timeout => "timeout",
            MailError::Http(_) => "http_error",
            MailError::BadStatus(_) => "rejected",
            MailError::Address(_) => "bad_address",
            MailError::Message(_) => "bad_message",
            MailError::Smtp(_) => "smtp_error",
        }
    }
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::NotConfigured => write!(f, "no mail relay is configured"),
            MailError::NoRecipient => write!(f, "profile has no contact email"),
            MailError::Timeout => write!(f, "mail relay request timed out"),
            MailError::Http(err) => write!(f, "mail relay HTTP error: {}", err),
            MailError::BadStatus(status) => write!(f, "mail relay returned status {}", status),
            MailError::Address(addr) => write!(f, "mail address {:?} is not valid", addr),
            MailError::Message(err) => write!(f, "mail message could not be built: {}", err),
            MailError::Smtp(err) => write!(f, "SMTP error: {}", err),
        }
    }
}

impl std::error::Error for MailError {}

impl From<reqwest::Error> for MailError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            MailError::Timeout
        } else {
            MailError::Http(value)
        }
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, MailError> {
    raw.parse::<Mailbox>()
        .map_err(|_| MailError::Address(raw.to_string()))
}

/// Most recent delivery that did not go through, shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub at: String,
    pub reason: String,
}

#[derive(Clone)]
enum Transport {
    Disabled,
    Http {
        endpoint: String,
        token: Option<String>,
        client: reqwest::Client,
    },
    Smtp(Arc<AsyncSmtpTransport<Tokio1Executor>>),
}

/// Forwards contact-form messages to the site owner through a JSON mail
/// gateway or an SMTP server.
#[derive(Clone)]
pub struct ContactRelay {
    transport: Transport,
    from_address: String,
    timeout: Duration,
    last_failure: Arc<RwLock<Option<DeliveryFailure>>>,
}

impl ContactRelay {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));

        let transport = match &config.transport {
            MailTransport::Disabled => Transport::Disabled,
            MailTransport::Http { url, token } => Transport::Http {
                endpoint: url.clone(),
                token: token.clone(),
                client: reqwest::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(MailError::Http)?,
            },
            MailTransport::Smtp(settings) => {
                parse_mailbox(&config.from_address)?;
                Transport::Smtp(Arc::new(smtp_transport(settings, timeout)?))
            }
        };

        Ok(Self {
            transport,
            from_address: config.from_address.clone(),
            timeout,
            last_failure: Arc::new(RwLock::new(None)),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self.transport {
            Transport::Disabled => "disabled",
            Transport::Http { .. } => "http",
            Transport::Smtp(_) => "smtp",
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self.transport, Transport::Disabled)
    }

    /// Sends in the background. The visitor's request never waits on the relay.
    pub fn dispatch(&self, contact: ContactMessage, recipient: String) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let _ = relay.relay(&contact, &recipient).await;
        })
    }

    /// Sends one message and records the outcome.
    pub async fn relay(&self, contact: &ContactMessage, recipient: &str) -> Result<(), MailError> {
        let span = tracing::info_span!(
            "contact.deliver",
            transport = self.kind(),
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let started = Instant::now();

        async move {
            let result = self.deliver(contact, recipient).await;

            let outcome = match &result {
                Ok(()) => "ok",
                Err(err) => err.outcome(),
            };
            tracing::Span::current().record("latency_ms", started.elapsed().as_millis() as u64);
            tracing::Span::current().record("outcome", outcome);
            crate::metrics::observe_contact_delivery(outcome);

            match &result {
                Ok(()) => {
                    tracing::info!("contact.delivered");
                    *self.last_failure.write().await = None;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "contact.delivery_failed");
                    *self.last_failure.write().await = Some(DeliveryFailure {
                        at: chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
                        reason: err.to_string(),
                    });
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    pub async fn last_failure(&self) -> Option<DeliveryFailure> {
        self.last_failure.read().await.clone()
    }

    async fn deliver(&self, contact: &ContactMessage, recipient: &str) -> Result<(), MailError> {
        if let Transport::Disabled = self.transport {
            return Err(MailError::NotConfigured);
        }
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(MailError::NoRecipient);
        }

        let mail = OutboundMail::compose(contact, &self.from_address, recipient);
        match &self.transport {
            Transport::Disabled => Err(MailError::NotConfigured),
            Transport::Http {
                endpoint,
                token,
                client,
            } => {
                let mut request = client.post(endpoint).json(&mail);
                if let Some(token) = token.as_deref() {
                    request = request.bearer_auth(token);
                }

                let resp = request.send().await?;
                if !resp.status().is_success() {
                    return Err(MailError::BadStatus(resp.status()));
                }
                Ok(())
            }
            Transport::Smtp(smtp) => {
                let message = mail.to_message()?;
                tokio::time::timeout(self.timeout, smtp.send(message))
                    .await
                    .map_err(|_| MailError::Timeout)?
                    .map_err(MailError::Smtp)?;
                Ok(())
            }
        }
    }
}

fn smtp_transport(
    settings: &SmtpSettings,
    timeout: Duration,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
    let builder = if settings.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(MailError::Smtp)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
    };

    let mut builder = builder.port(settings.port).timeout(Some(timeout));
    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ContactMessage {
        ContactMessage {
            sender_name: "Grace".to_string(),
            sender_email: "grace@example.com".to_string(),
            message: "Hello there".to_string(),
        }
    }

    fn relay_with(transport: MailTransport) -> ContactRelay {
        ContactRelay::new(&MailConfig {
            transport,
            from_address: "site@example.com".to_string(),
            timeout_ms: 500,
        })
        .unwrap()
    }

    fn unconfigured() -> ContactRelay {
        relay_with(MailTransport::Disabled)
    }

    fn local_smtp(port: u16) -> SmtpSettings {
        SmtpSettings {
            host: "127.0.0.1".to_string(),
            port,
            starttls: false,
            username: None,
            password: None,
        }
    }

    #[test]
    fn composed_mail_addresses_owner_and_replies_to_visitor() {
        let mail = OutboundMail::compose(&contact(), "site@example.com", "owner@example.com");
        assert_eq!(mail.from, "site@example.com");
        assert_eq!(mail.to, "owner@example.com");
        assert_eq!(mail.reply_to, "grace@example.com");
        assert_eq!(mail.subject, "Portfolio Contact from Grace");
        assert!(mail.text.contains("Name: Grace"));
        assert!(mail.text.contains("Email: grace@example.com"));
        assert!(mail.text.ends_with("Hello there"));
    }

    #[tokio::test]
    async fn missing_relay_is_recorded_as_failure() {
        let relay = unconfigured();
        assert!(!relay.is_configured());

        let err = relay.relay(&contact(), "owner@example.com").await.unwrap_err();
        assert_eq!(err.outcome(), "not_configured");

        let failure = relay.last_failure().await.expect("failure should be kept");
        assert_eq!(failure.reason, "no mail relay is configured");
    }

    #[tokio::test]
    async fn empty_recipient_is_not_sent() {
        let relay = relay_with(MailTransport::Http {
            url: "http://127.0.0.1:9/send".to_string(),
            token: None,
        });

        let err = relay.relay(&contact(), "  ").await.unwrap_err();
        assert_eq!(err.outcome(), "no_recipient");

        let relay = relay_with(MailTransport::Smtp(local_smtp(9)));
        let err = relay.relay(&contact(), "").await.unwrap_err();
        assert_eq!(err.outcome(), "no_recipient");
    }

    #[test]
    fn smtp_message_carries_addresses_and_body() {
        let mail = OutboundMail::compose(&contact(), "site@example.com", "owner@example.com");
        let formatted = String::from_utf8(mail.to_message().unwrap().formatted()).unwrap();
        assert!(formatted.contains("From: site@example.com"));
        assert!(formatted.contains("To: owner@example.com"));
        assert!(formatted.contains("Reply-To: grace@example.com"));
        assert!(formatted.contains("Subject: Portfolio Contact from Grace"));
        assert!(formatted.contains("Hello there"));
    }

    #[test]
    fn smtp_message_skips_unusable_reply_to() {
        let mut visitor = contact();
        visitor.sender_email = "not an address".to_string();
        let mail = OutboundMail::compose(&visitor, "site@example.com", "owner@example.com");
        let formatted = String::from_utf8(mail.to_message().unwrap().formatted()).unwrap();
        assert!(!formatted.contains("Reply-To"));

        let mail = OutboundMail::compose(&contact(), "site@example.com", "nobody");
        assert_eq!(mail.to_message().unwrap_err().outcome(), "bad_address");
    }

    #[test]
    fn smtp_relay_needs_a_valid_sender() {
        let err = ContactRelay::new(&MailConfig {
            transport: MailTransport::Smtp(local_smtp(25)),
            from_address: "portfolio".to_string(),
            timeout_ms: 100,
        })
        .err()
        .expect("sender must be a mailbox");
        assert_eq!(err.outcome(), "bad_address");

        let relay = relay_with(MailTransport::Smtp(SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            starttls: true,
            username: Some("site".to_string()),
            password: Some("hunter2".to_string()),
        }));
        assert!(relay.is_configured());
        assert_eq!(relay.kind(), "smtp");
    }

    #[tokio::test]
    async fn unreachable_smtp_server_is_recorded_as_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let relay = relay_with(MailTransport::Smtp(local_smtp(port)));
        let err = relay.relay(&contact(), "owner@example.com").await.unwrap_err();
        assert!(matches!(err.outcome(), "smtp_error" | "timeout"));
        assert!(relay.last_failure().await.is_some());
    }

    #[test]
    fn smtp_settings_debug_hides_password() {
        let settings = SmtpSettings {
            password: Some("hunter2".to_string()),
            ..local_smtp(25)
        };
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn dispatch_runs_detached() {
        let relay = unconfigured();
        relay
            .dispatch(contact(), "owner@example.com".to_string())
            .await
            .unwrap();
        assert!(relay.last_failure().await.is_some());
    }
}
