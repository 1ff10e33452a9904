//! SMTP delivery: builds the raw RFC-822 message the spec describes (no
//! `To:` header — recipients travel only in the SMTP envelope) and sends
//! it through `lettre`.
//!
//! Grounded on `examples/DaniilShunto-Code2/smtp-mailer-main` (`lettre`'s
//! `AsyncSmtpTransport<Tokio1Executor>` + `starttls_relay` + `Credentials`
//! construction), diverging where the spec diverges: that mailer renders a
//! `To:` header into the message body, but this one needs the header block
//! literally as specified, so the message bytes are assembled by hand and
//! sent with `send_raw` against an explicit `Envelope` instead of going
//! through `Message::builder()`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::errors::MailError;

/// The report pipeline's only dependency on delivery, mirroring the
/// `SpeechClient` trait seam: the production impl is a real SMTP send,
/// tests supply a fake that records what it was asked to send.
#[async_trait]
pub trait ReportMailer: Send + Sync {
    async fn send_report(&self, subject: &str, html: &str, recipients: &[String]) -> Result<()>;
}

pub struct MailerSettings {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub username: String,
    pub password: String,
}

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl Mailer {
    pub fn new(settings: &MailerSettings) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .with_context(|| format!("building smtp transport for {}", settings.host))?
            .port(settings.port)
            .credentials(Credentials::new(settings.username.clone(), settings.password.clone()))
            .build();

        Ok(Self {
            transport,
            from: settings.from.clone(),
        })
    }
}

#[async_trait]
impl ReportMailer for Mailer {
    /// Sends an HTML report to `recipients`, partitioning out addresses
    /// that don't parse. The send proceeds with whatever's left; parse
    /// failures are logged by the caller, never fatal. Fails only if every
    /// recipient was invalid.
    async fn send_report(&self, subject: &str, html: &str, recipients: &[String]) -> Result<()> {
        let (valid, invalid): (Vec<Address>, Vec<String>) = partition_recipients(recipients);

        if !invalid.is_empty() {
            tracing::warn!(?invalid, "dropping unparseable mail recipients");
        }
        if valid.is_empty() {
            return Err(MailError::NoValidRecipients { failed: invalid }.into());
        }

        let from: Address = self
            .from
            .parse()
            .with_context(|| format!("configured from address {} does not parse", self.from))?;
        let envelope = Envelope::new(Some(from), valid).context("building smtp envelope")?;
        let message = render_raw_message(subject, &self.from, html);

        self.transport
            .send_raw(&envelope, message.as_bytes())
            .await
            .map_err(|e| MailError::Send(e.into()))?;
        Ok(())
    }
}

fn partition_recipients(recipients: &[String]) -> (Vec<Address>, Vec<String>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for recipient in recipients {
        match recipient.parse::<Address>() {
            Ok(address) => valid.push(address),
            Err(_) => invalid.push(recipient.clone()),
        }
    }
    (valid, invalid)
}

/// Assembles the literal header block the spec calls for: a `Subject` and
/// `From` header, then the MIME preamble, then the HTML body. No `To:`
/// header — delivery is envelope-only.
fn render_raw_message(subject: &str, from: &str, html: &str) -> String {
    format!(
        "Subject: {subject}\nFrom: {from}\nMIME-version: 1.0;\nContent-Type: text/html; charset=\"UTF-8\";\n\n{html}"
    )
}

/// Collects every non-empty `mail` metadata value plus the fixed operator
/// address, de-duplicated and order-preserving (first occurrence wins).
#[must_use]
pub fn collect_recipients<'a>(mails: impl Iterator<Item = &'a str>, operator_address: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for mail in mails.chain(std::iter::once(operator_address)) {
        if seen.insert(mail.to_string()) {
            out.push(mail.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_recipients_dedupes_preserving_first_seen_order() {
        let mails = vec!["ok@x.y", "bad@@", "ok@x.y"];
        let recipients = collect_recipients(mails.into_iter(), "op@o");
        assert_eq!(recipients, vec!["ok@x.y", "bad@@", "op@o"]);
    }

    #[test]
    fn partition_recipients_separates_valid_and_invalid() {
        let recipients = vec!["ok@x.y".to_string(), "bad@@".to_string(), "op@o".to_string()];
        let (valid, invalid) = partition_recipients(&recipients);
        assert_eq!(valid.len(), 2);
        assert_eq!(invalid, vec!["bad@@".to_string()]);
    }

    #[test]
    fn render_raw_message_omits_to_header() {
        let message = render_raw_message("Subject text", "from@x.y", "<p>hi</p>");
        assert!(!message.contains("To:"));
        assert!(message.starts_with("Subject: Subject text\nFrom: from@x.y\n"));
        assert!(message.ends_with("<p>hi</p>"));
    }
}
