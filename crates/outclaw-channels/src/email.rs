//! Outbound email — paced SMTP dispatch over the durable queue.
//!
//! Sends HTML mail via STARTTLS (async lettre). Requests come off a
//! snapshot-backed queue one at a time with fixed pacing between sends, so
//! a burst of campaign mail never hits the relay all at once.

use async_trait::async_trait;
use base64::Engine;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use outclaw_core::config::EmailConfig;
use outclaw_core::error::{OutClawError, Result};
use outclaw_core::traits::EmailTransport;
use outclaw_core::types::EmailRequest;
use outclaw_scheduler::queue::{QueueHandle, spawn_durable_queue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// SMTP transport configured from `[email]`.
pub struct SmtpChannel {
    from: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpChannel {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| OutClawError::channel(format!("SMTP relay: {e}")))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();
        Ok(Self {
            from: config.from.clone(),
            mailer,
        })
    }

    fn build_message(&self, req: &EmailRequest) -> Result<Message> {
        let from_mailbox: Mailbox = self
            .from
            .parse()
            .map_err(|e| OutClawError::channel(format!("Invalid from: {e}")))?;
        let to_mailbox: Mailbox = req
            .to
            .parse()
            .map_err(|e| OutClawError::channel(format!("Invalid to: {e}")))?;

        let mut builder = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(&req.subject);

        if let Some(reply_to) = &req.reply_to {
            let reply_mailbox: Mailbox = reply_to
                .parse()
                .map_err(|e| OutClawError::channel(format!("Invalid reply-to: {e}")))?;
            builder = builder.reply_to(reply_mailbox);
        }

        let html = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(req.html.clone());

        let message = match &req.attachment {
            Some(att) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&att.content_b64)
                    .map_err(|e| OutClawError::channel(format!("Bad attachment: {e}")))?;
                let content_type = ContentType::parse(&att.content_type)
                    .or_else(|_| ContentType::parse("application/octet-stream"))
                    .map_err(|e| OutClawError::channel(format!("Bad content type: {e}")))?;
                let part = Attachment::new(att.filename.clone()).body(bytes, content_type);
                builder
                    .multipart(MultiPart::mixed().singlepart(html).singlepart(part))
                    .map_err(|e| OutClawError::channel(format!("Build email: {e}")))?
            }
            None => builder
                .singlepart(html)
                .map_err(|e| OutClawError::channel(format!("Build email: {e}")))?,
        };
        Ok(message)
    }
}

#[async_trait]
impl EmailTransport for SmtpChannel {
    async fn send(&self, req: &EmailRequest) -> Result<()> {
        let message = self.build_message(req)?;
        self.mailer
            .send(message)
            .await
            .map_err(|e| OutClawError::channel(format!("SMTP send: {e}")))?;
        tracing::info!("📤 Email sent to: {}", req.to);
        Ok(())
    }
}

/// Spawn the paced email queue in front of any transport.
pub fn spawn_email_queue(
    transport: Arc<dyn EmailTransport>,
    snapshot_path: PathBuf,
    pacing_secs: u64,
) -> QueueHandle<EmailRequest> {
    spawn_durable_queue(
        "email",
        snapshot_path,
        Duration::from_secs(pacing_secs),
        move |req: EmailRequest| {
            let transport = transport.clone();
            async move { transport.send(&req).await }
        },
    )
}
