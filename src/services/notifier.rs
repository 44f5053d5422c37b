// src/services/notifier.rs

//! Change notification sinks.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::Config;

/// Delivers a human-readable change message.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts `{"text": message}` to an incoming-webhook endpoint.
pub struct WebhookNotifier {
    url: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, client: Client) -> Self {
        Self {
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { text: message })
            .send()
            .await
            .map_err(|e| AppError::Notification(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "webhook returned {status}: {}",
                body.trim()
            )));
        }
        Ok(())
    }
}

/// Writes messages to the log; used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        log::info!(target: "regwatch::notify", "{message}");
        Ok(())
    }
}

/// Webhook notifier when `notify.webhook_url` is set, log notifier otherwise.
pub fn notifier_from_config(config: &Config, client: &Client) -> Box<dyn Notifier> {
    match config.notify.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Box::new(WebhookNotifier::new(url, client.clone())),
        _ => Box::new(LogNotifier),
    }
}
