//! HTTP client for the wa-relay-sidecar bridge.
//!
//! All WhatsApp operations go through this client, which talks to the
//! WhatsApp Web bridge over HTTP on `127.0.0.1`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::WhatsAppError;
use crate::config::SessionConfig;
use crate::http::truncate_body;
use crate::session::{Conversation, Session};

/// HTTP connect timeout for the reqwest client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// HTTP request timeout for normal operations.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Number of health-check retries before giving up.
const HEALTH_CHECK_RETRIES: u32 = 5;

/// Delay between health-check attempts in milliseconds.
const HEALTH_CHECK_DELAY_MS: u64 = 2000;

/// Client for the sidecar HTTP bridge.
#[derive(Debug, Clone)]
pub struct WhatsAppClient {
    client: reqwest::Client,
    base_url: String,
}

/// Connection status from the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppStatus {
    /// Whether the sidecar is connected to WhatsApp.
    pub connected: bool,
    /// Whether a pairing code is waiting to be scanned.
    #[serde(default)]
    pub awaiting_pairing: bool,
    /// The phone number linked, if connected.
    pub phone_number: Option<String>,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    #[allow(dead_code)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ReplyRequest<'a> {
    jid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quoted_message_id: Option<&'a str>,
    text: &'a str,
}

impl WhatsAppClient {
    /// Create a new client pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Create a client from the `[session]` config section.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.bridge_url.clone())
    }

    /// Check whether the sidecar answers its status endpoint.
    ///
    /// A reachable sidecar that still needs pairing counts as healthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/status", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Wait for the sidecar to become healthy, retrying with a fixed delay.
    pub async fn wait_healthy(&self) -> Result<(), WhatsAppError> {
        for attempt in 0..HEALTH_CHECK_RETRIES {
            if self.health_check().await {
                return Ok(());
            }
            if attempt < HEALTH_CHECK_RETRIES.saturating_sub(1) {
                tokio::time::sleep(Duration::from_millis(HEALTH_CHECK_DELAY_MS)).await;
            }
        }
        Err(WhatsAppError::SidecarNotRunning)
    }

    /// Get the current connection status from the sidecar.
    pub async fn status(&self) -> Result<WhatsAppStatus, WhatsAppError> {
        let url = format!("{}/status", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<WhatsAppStatus> = resp.json().await?;
        body.data.ok_or(WhatsAppError::SidecarNotRunning)
    }

    /// Get the pending pairing code for WhatsApp Web linking.
    pub async fn get_qr(&self) -> Result<String, WhatsAppError> {
        let url = format!("{}/qr", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let body: BridgeResponse<String> = resp.json().await?;
        body.data.ok_or_else(|| {
            WhatsAppError::SetupFailed(
                body.error
                    .unwrap_or_else(|| "no QR code available".to_owned()),
            )
        })
    }

    /// Reply in a conversation, quoting the original message when known.
    pub async fn send_reply(
        &self,
        conversation: &Conversation,
        text: &str,
    ) -> Result<(), WhatsAppError> {
        let url = format!("{}/reply", self.base_url);
        let body = ReplyRequest {
            jid: &conversation.jid,
            quoted_message_id: conversation.message_id.as_deref(),
            text,
        };
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::CONFLICT {
            return Err(WhatsAppError::NotConnected);
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, "WhatsApp reply failed");
            return Err(WhatsAppError::SendRejected {
                status,
                body: truncate_body(&body_text),
            });
        }
        debug!(jid = %conversation.jid, "reply sent via WhatsApp");
        Ok(())
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Session for WhatsAppClient {
    async fn reply(&self, conversation: &Conversation, text: &str) -> Result<(), WhatsAppError> {
        self.send_reply(conversation, text).await
    }
}
