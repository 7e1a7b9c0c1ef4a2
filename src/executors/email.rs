//! Built-in email executor.
//!
//! The delivery behavior is chosen once, when the executor is built: in
//! development mode messages are only logged, in production mode they go out
//! through an SMTP relay.

use crate::config::{EmailConfig, EmailMode, SmtpConfig};
use crate::error::{DispatchError, DispatchResult};
use crate::materialize::fill_struct;
use crate::task::{Envelope, TaskExecutor};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use std::sync::Arc;

/// Parameters of a [`TaskId::SEND_EMAIL`](crate::task::TaskId::SEND_EMAIL) task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendEmailParams {
    /// Sender address
    #[serde(rename = "From")]
    pub from: String,
    /// Recipient address
    #[serde(rename = "To")]
    pub to: String,
    /// Subject line
    #[serde(rename = "Subject")]
    pub subject: String,
    /// HTML body
    #[serde(rename = "Body")]
    pub body: String,
}

crate::materialize!(SendEmailParams {
    "From" => from,
    "To" => to,
    "Subject" => subject,
    "Body" => body,
});

/// Something that can deliver an email.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver `message`.
    async fn send(&self, message: &SendEmailParams) -> DispatchResult<()>;
}

/// Development mailer: logs instead of sending.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &SendEmailParams) -> DispatchResult<()> {
        tracing::info!(
            from = %message.from,
            to = %message.to,
            subject = %message.subject,
            body_len = message.body.len(),
            "Email would have been sent"
        );
        Ok(())
    }
}

/// Production mode without a configured relay: logs a warning and reports
/// success, so the task is not treated as failed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredMailer;

#[async_trait]
impl Mailer for UnconfiguredMailer {
    async fn send(&self, message: &SendEmailParams) -> DispatchResult<()> {
        tracing::warn!(to = %message.to, "No email provider configured, message not sent");
        Ok(())
    }
}

/// SMTP relay mailer.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer").finish_non_exhaustive()
    }
}

impl SmtpMailer {
    /// Build a mailer for the relay described by `config`.
    pub fn new(config: &SmtpConfig) -> DispatchResult<Self> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| DispatchError::config(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self { transport })
    }

    fn build_message(message: &SendEmailParams) -> DispatchResult<Message> {
        validate_recipient(&message.to)?;

        let from: Mailbox = message
            .from
            .parse()
            .map_err(|e| DispatchError::task_execution("Invalid from address", e))?;
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| DispatchError::task_execution("Invalid to address", e))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                html_to_text(&message.body),
                message.body.clone(),
            ))
            .map_err(|e| DispatchError::task_execution("Failed to build email", e))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &SendEmailParams) -> DispatchResult<()> {
        let email = Self::build_message(message)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| DispatchError::task_execution("SMTP worker failed", e))?
            .map_err(|e| DispatchError::task_execution("SMTP send failed", e))?;

        tracing::info!(to = %message.to, "Email sent");
        Ok(())
    }
}

/// Executor for [`TaskId::SEND_EMAIL`](crate::task::TaskId::SEND_EMAIL).
pub struct EmailExecutor {
    mailer: Arc<dyn Mailer>,
    mode: EmailMode,
}

impl EmailExecutor {
    /// Executor delivering through `mailer`.
    pub fn new(mailer: Arc<dyn Mailer>, mode: EmailMode) -> Self {
        Self { mailer, mode }
    }

    /// Log-only executor.
    pub fn development() -> Self {
        Self::new(Arc::new(LogMailer), EmailMode::Development)
    }

    /// Executor for the mode and relay in `config`.
    pub fn from_config(config: &EmailConfig) -> DispatchResult<Self> {
        let mailer: Arc<dyn Mailer> = match (config.mode, &config.smtp) {
            (EmailMode::Development, _) => Arc::new(LogMailer),
            (EmailMode::Production, Some(smtp)) => Arc::new(SmtpMailer::new(smtp)?),
            (EmailMode::Production, None) => Arc::new(UnconfiguredMailer),
        };
        Ok(Self::new(mailer, config.mode))
    }

    /// Delivery mode fixed at construction.
    pub fn mode(&self) -> EmailMode {
        self.mode
    }
}

impl Default for EmailExecutor {
    fn default() -> Self {
        Self::development()
    }
}

#[async_trait]
impl TaskExecutor for EmailExecutor {
    async fn execute(&self, envelope: &Envelope) -> DispatchResult<()> {
        let params: SendEmailParams = fill_struct(&envelope.payload)?;
        self.mailer.send(&params).await
    }

    fn name(&self) -> &'static str {
        "email"
    }
}

fn validate_recipient(to: &str) -> DispatchResult<()> {
    if to.trim().is_empty() || !to.contains('@') {
        return Err(DispatchError::execution(format!(
            "invalid recipient address '{to}'"
        )));
    }
    Ok(())
}

/// Plain-text rendition of an HTML body, used as the text alternative.
pub fn html_to_text(html: &str) -> String {
    let mut source = html;

    // A full page only contributes its body.
    if let Some(start) = source.find("<body") {
        if let Some(end) = source[start..].find("</body>").map(|i| i + start) {
            let content_start = source[start..end]
                .find('>')
                .map(|i| start + i + 1)
                .unwrap_or(end);
            source = &source[content_start..end];
        }
    }

    if !source.contains(['<', '>']) {
        return decode_entities(source).trim().to_string();
    }

    let mut flattened = source.replace('\n', "");
    for closer in ["</h1>", "</h2>", "</h3>", "</h4>", "</h5>", "</h6>"] {
        flattened = flattened.replace(closer, "\n\n");
    }
    for breaker in ["</p>", "<br>", "<br/>", "<br />"] {
        flattened = flattened.replace(breaker, "\n");
    }

    let mut text = String::with_capacity(flattened.len());
    let mut in_tag = false;
    for c in flattened.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    decode_entities(&text).trim().to_string()
}

fn decode_entities(text: &str) -> String {
    const ENTITIES: [(&str, &str); 11] = [
        ("&#8216;", "'"),
        ("&#8217;", "'"),
        ("&#8220;", "\""),
        ("&#8221;", "\""),
        ("&nbsp;", " "),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&#39;", "'"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&amp;", "&"),
    ];

    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}
