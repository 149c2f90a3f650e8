// src/notify/email.rs
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use crate::config::EmailSettings;
use crate::ingest::{clean_html, item_id};

#[async_trait]
pub trait NewsletterSender: Send + Sync {
    /// Deliver one HTML message; returns the Message-ID.
    async fn send_html(&self, subject: &str, html: &str, from: &str, to: &[String]) -> Result<String>;
}

pub struct SmtpSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpSender {
    /// Port 465 uses implicit TLS, anything else STARTTLS.
    pub fn new(cfg: &EmailSettings) -> Result<Self> {
        let builder = if cfg.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
        }
        .with_context(|| format!("invalid SMTP host {}", cfg.smtp_host))?;
        let mailer = builder
            .port(cfg.smtp_port)
            .credentials(Credentials::new(
                cfg.smtp_username.clone(),
                cfg.smtp_password.clone(),
            ))
            .timeout(Some(Duration::from_secs(cfg.timeout_secs)))
            .build();
        Ok(Self { mailer })
    }
}

#[async_trait]
impl NewsletterSender for SmtpSender {
    async fn send_html(&self, subject: &str, html: &str, from: &str, to: &[String]) -> Result<String> {
        if to.is_empty() {
            bail!("no recipients");
        }
        let from: Mailbox = from.parse().with_context(|| format!("invalid sender {from}"))?;
        let message_id = format!(
            "<{}@silvertree-newsletter>",
            &item_id(&format!("{subject}{}", Utc::now().timestamp_nanos_opt().unwrap_or_default()))[..32]
        );

        let mut builder = Message::builder()
            .from(from)
            .subject(subject)
            .message_id(Some(message_id.clone()));
        for addr in to {
            let mb: Mailbox = addr.parse().with_context(|| format!("invalid recipient {addr}"))?;
            builder = builder.to(mb);
        }
        let msg = builder
            .multipart(MultiPart::alternative_plain_html(clean_html(html), html.to_string()))
            .context("build email")?;

        self.mailer.send(msg).await.context("send email")?;
        Ok(message_id)
    }
}
