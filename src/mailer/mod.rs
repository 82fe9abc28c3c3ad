//! Outbound email: formatting and the delivery seam.

pub mod smtp;

use async_trait::async_trait;

use crate::config::NUMBER_PLACEHOLDER;
use crate::error::MailError;
use crate::modem::Sms;

pub use smtp::SmtpMailer;

/// A plain-text email ready for delivery. Sender and recipients belong to
/// the mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub subject: String,
    pub body: String,
}

/// Delivers formatted emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send `email` to every configured recipient.
    ///
    /// Any recipient rejection fails the whole send.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Turn an SMS into an email. The body is the SMS text, untouched.
pub fn format_email(sms: &Sms, subject_template: &str) -> OutgoingEmail {
    OutgoingEmail {
        subject: subject_template.replace(NUMBER_PLACEHOLDER, &sms.sender),
        body: sms.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sms(sender: &str, body: &str) -> Sms {
        Sms {
            sender: sender.into(),
            body: body.into(),
            received_at: Utc::now().fixed_offset(),
        }
    }

    #[test]
    fn placeholder_replaced_with_sender() {
        let email = format_email(&sms("+5511999999999", "hello"), "New SMS from %number%");
        assert_eq!(email.subject, "New SMS from +5511999999999");
        assert_eq!(email.body, "hello");
    }

    #[test]
    fn template_without_placeholder_used_verbatim() {
        let email = format_email(&sms("+1555", "hi"), "SMS relay");
        assert_eq!(email.subject, "SMS relay");
    }

    #[test]
    fn every_placeholder_replaced() {
        let email = format_email(&sms("TIM", "x"), "%number% / %number%");
        assert_eq!(email.subject, "TIM / TIM");
    }

    #[test]
    fn body_is_not_modified() {
        let body = "  <b>line one</b>\nline two  ";
        let email = format_email(&sms("+1", body), "");
        assert_eq!(email.body, body);
        assert_eq!(email.subject, "");
    }
}
