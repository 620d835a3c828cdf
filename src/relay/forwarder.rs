//! Webhook forwarder: POST one payload, relay the reply, fall back on failure.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{RelayError, RelayOutcome, RelayPayload, WebhookResponse};
use crate::config::WebhookConfig;
use crate::http::truncate_body;
use crate::session::{Conversation, Session};

/// Delivers payloads to the configured webhook and acts on its response.
#[derive(Debug, Clone)]
pub struct WebhookForwarder {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
    retry_delay: Duration,
    fallback_message: String,
}

impl WebhookForwarder {
    /// Build a forwarder from the `[webhook]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &WebhookConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            fallback_message: config.fallback_message.clone(),
        })
    }

    /// The webhook URL payloads are sent to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST `payload` to the webhook and decode the response.
    ///
    /// Makes `1 + max_retries` attempts at most. Only connection failures,
    /// timeouts and 5xx answers are retried.
    pub async fn forward(&self, payload: &RelayPayload) -> Result<WebhookResponse, RelayError> {
        let attempts = self.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.post_once(payload).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < attempts && is_retryable(&e) => {
                    warn!(error = %e, attempt, attempts, "webhook attempt failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, payload: &RelayPayload) -> Result<WebhookResponse, RelayError> {
        debug!(url = %self.url, "posting to webhook");
        let resp = self.client.post(&self.url).json(payload).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(RelayError::Status {
                status,
                body: truncate_body(&body),
            });
        }
        if body.trim().is_empty() {
            return Ok(WebhookResponse::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Forward one accepted message and answer the sender.
    ///
    /// A webhook reply goes into `conversation`. A response without a reply
    /// is logged and dropped. Any failure while forwarding or replying sends
    /// the fallback message instead; if that send fails too, its error is
    /// returned.
    pub async fn relay(
        &self,
        session: &dyn Session,
        payload: RelayPayload,
        conversation: Conversation,
    ) -> Result<RelayOutcome, RelayError> {
        let attempt = match self.forward(&payload).await {
            Ok(response) => match response.reply_text() {
                Some(reply) => session
                    .reply(&conversation, reply)
                    .await
                    .map(|()| RelayOutcome::Replied)
                    .map_err(RelayError::from),
                None => {
                    warn!("webhook response has no reply field, message dropped");
                    return Ok(RelayOutcome::NoReply);
                }
            },
            Err(e) => Err(e),
        };

        match attempt {
            Ok(outcome) => {
                info!("reply delivered");
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "relay failed, sending fallback message");
                session.reply(&conversation, &self.fallback_message).await?;
                Ok(RelayOutcome::Fallback)
            }
        }
    }
}

fn is_retryable(error: &RelayError) -> bool {
    match error {
        RelayError::Http(_) => true,
        RelayError::Status { status, .. } => status.is_server_error(),
        RelayError::Decode(_) | RelayError::Session(_) => false,
    }
}
