//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::config::SmtpConfig;
use crate::error::MailError;
use crate::mailer::{Mailer, OutgoingEmail};

/// Sends plain-text mail over a fresh SMTP session per message.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn transport(&self) -> Result<SmtpTransport, MailError> {
        let builder = if self.config.tls {
            SmtpTransport::starttls_relay(&self.config.host)
                .map_err(|e| MailError::Transport(format!("SMTP relay error: {e}")))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.host)
        };

        let mut builder = builder.port(self.config.port);
        if let Some(creds) = &self.config.credentials {
            builder = builder.credentials(Credentials::new(
                creds.username.clone(),
                creds.password.expose_secret().to_string(),
            ));
        }
        Ok(builder.build())
    }

    /// Build the MIME message addressed to every configured recipient.
    pub fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(self.config.sender.clone())
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.config.recipients {
            builder = builder.to(recipient.clone());
        }
        builder
            .body(email.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(email)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::Task(e.to_string()))?
            .map_err(|e| MailError::Transport(e.to_string()))?;

        debug!(
            host = %self.config.host,
            recipients = self.config.recipients.len(),
            "Email sent"
        );
        Ok(())
    }
}
