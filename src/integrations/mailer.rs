//! Transactional email over SMTP (welcome mails, automation emails)

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::instrument;

use super::IntegrationError;
use crate::config::SmtpConfig;

/// A single outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    /// Optional HTML alternative
    pub html: Option<String>,
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn send(&self, email: OutgoingEmail) -> Result<(), IntegrationError>;
}

struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

pub struct Mailer {
    smtp: Option<SmtpTransport>,
}

impl Mailer {
    /// Build from config; without a host and sender address the mailer is
    /// inert and every send fails with `NotConfigured`.
    pub fn new(config: &SmtpConfig) -> Result<Self, IntegrationError> {
        let (Some(host), Some(from)) = (
            config.host.as_deref().filter(|h| !h.is_empty()),
            config.from.as_deref().filter(|f| !f.is_empty()),
        ) else {
            return Ok(Self { smtp: None });
        };

        let from: Mailbox = format!("{} <{}>", config.from_name, from)
            .parse()
            .map_err(|e| IntegrationError::Smtp(format!("Invalid from address: {e}")))?;

        let mut builder = match config.port {
            465 => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            587 => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
            _ => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)),
        }
        .map_err(|e| IntegrationError::Smtp(format!("Failed to create SMTP transport: {e}")))?
        .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            smtp: Some(SmtpTransport {
                transport: builder.build(),
                from,
            }),
        })
    }

    fn build_message(from: &Mailbox, email: OutgoingEmail) -> Result<Message, IntegrationError> {
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| IntegrationError::Smtp(format!("Invalid recipient address: {e}")))?;

        let builder = Message::builder()
            .from(from.clone())
            .to(to)
            .subject(email.subject);

        let message = match email.html {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(email.text, html)),
            None => builder.body(email.text),
        };
        message.map_err(|e| IntegrationError::Smtp(format!("Failed to build email: {e}")))
    }
}

#[async_trait]
impl EmailSender for Mailer {
    fn is_configured(&self) -> bool {
        self.smtp.is_some()
    }

    #[instrument(skip_all, fields(to = %email.to))]
    async fn send(&self, email: OutgoingEmail) -> Result<(), IntegrationError> {
        let smtp = self
            .smtp
            .as_ref()
            .ok_or(IntegrationError::NotConfigured("SMTP"))?;
        let message = Self::build_message(&smtp.from, email)?;
        smtp.transport
            .send(message)
            .await
            .map_err(|e| IntegrationError::Smtp(format!("Failed to send email: {e}")))?;
        Ok(())
    }
}
