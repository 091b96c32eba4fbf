//! Email provider: composes a multipart/alternative message and sends it
//! over SMTP via `lettre`. `lettre`'s synchronous transport is dispatched
//! through `spawn_blocking` so it doesn't stall the dispatcher's async
//! worker.

use super::{NotificationProvider, ProviderError};
use crate::notify::{RotationEvent, RotationEventKind};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn crlf_sanitizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\r\n]").expect("static regex is valid"))
}

/// Matches a header-name prefix (`bcc:`, `cc:`, `to:`, `from:`, `subject:`,
/// `reply-to:`, or any `x-...:` token) so it can be stripped out of a
/// subject line before it reaches the header, regardless of case.
fn header_injection_sanitizer() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(bcc|cc|to|from|subject|reply-to|x-[a-z0-9-]+):").expect("static regex is valid")
    })
}

fn whitespace_collapser() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Sanitize a value bound for the `Subject` header (spec §4.6 scenario 8):
/// CR/LF become spaces, then any substring matching a mail-header prefix
/// (`Bcc:`, `Cc:`, `To:`, `From:`, `Subject:`, `Reply-To:`, `X-*:`) is
/// stripped case-insensitively, then whitespace is collapsed.
fn sanitize_subject(value: &str) -> String {
    let no_crlf = crlf_sanitizer().replace_all(value, " ");
    let no_headers = header_injection_sanitizer().replace_all(&no_crlf, "");
    whitespace_collapser().replace_all(&no_headers, " ").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Immediate,
    Hourly,
    Daily,
}

impl BatchMode {
    fn parse(value: &str) -> Result<Self, ProviderError> {
        match value {
            "immediate" => Ok(BatchMode::Immediate),
            "hourly" => Ok(BatchMode::Hourly),
            "daily" => Ok(BatchMode::Daily),
            other => Err(ProviderError::InvalidConfig(format!(
                "invalid batch mode '{other}', expected immediate, hourly or daily"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

pub struct EmailProvider {
    config: SmtpConfig,
    to: Vec<String>,
    batch_mode: BatchMode,
}

impl EmailProvider {
    pub fn new(config: SmtpConfig, to: Vec<String>) -> Self {
        Self { config, to, batch_mode: BatchMode::Immediate }
    }

    /// Defaults to `"immediate"`; only that mode is actually implemented
    /// (spec §4.6: "hourly/daily behavior is reserved").
    pub fn with_batch_mode(mut self, batch_mode: &str) -> Result<Self, ProviderError> {
        self.batch_mode = BatchMode::parse(batch_mode)?;
        Ok(self)
    }

    fn transport(&self) -> Result<SmtpTransport, ProviderError> {
        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let transport = SmtpTransport::relay(&self.config.host)
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?
            .port(self.config.port)
            .credentials(creds)
            .build();
        Ok(transport)
    }

    fn build_message(&self, event: &RotationEvent, to: &str) -> Result<Message, ProviderError> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid from address: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid to address: {e}")))?;

        let subject = sanitize_subject(&event.title());
        let text = format!(
            "{}\n\nservice: {}\nenvironment: {}\ntimestamp: {}\n",
            subject, event.service, event.environment, event.timestamp
        );
        let html = format!(
            "<p><strong>{}</strong></p><ul><li>service: {}</li><li>environment: {}</li><li>timestamp: {}</li></ul>",
            subject, event.service, event.environment, event.timestamp
        );

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(text))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html)),
            )
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))
    }
}

#[async_trait]
impl NotificationProvider for EmailProvider {
    fn name(&self) -> &str {
        "email"
    }

    fn supports_event(&self, _kind: RotationEventKind) -> bool {
        true
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.config.host.trim().is_empty() {
            return Err(ProviderError::InvalidConfig("SMTP host must not be empty".to_string()));
        }
        if self.config.port == 0 {
            return Err(ProviderError::InvalidConfig("SMTP port must be nonzero".to_string()));
        }
        if self.to.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "at least one recipient is required".to_string(),
            ));
        }
        self.config
            .from
            .parse::<Mailbox>()
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid from address: {e}")))?;
        for to in &self.to {
            to.parse::<Mailbox>()
                .map_err(|e| ProviderError::InvalidConfig(format!("invalid recipient '{to}': {e}")))?;
        }
        Ok(())
    }

    async fn send(&self, event: &RotationEvent, _cancel: &ShutdownSignal) -> Result<(), ProviderError> {
        if self.batch_mode != BatchMode::Immediate {
            debug!(batch_mode = ?self.batch_mode, "batched email delivery is reserved; skipping send");
            return Ok(());
        }
        let messages = self
            .to
            .iter()
            .map(|to| self.build_message(event, to))
            .collect::<Result<Vec<_>, _>>()?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || {
            for message in messages {
                transport
                    .send(&message)
                    .map_err(|e| ProviderError::DeliveryFailed(e.to_string()))?;
            }
            Ok(())
        })
        .await
        .map_err(|e| ProviderError::DeliveryFailed(format!("email send task panicked: {e}")))?
    }
}
