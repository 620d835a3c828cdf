//! Event listener for the sidecar's event stream.
//!
//! Connects to the sidecar's `/events/poll` HTTP long-polling endpoint and
//! forwards pairing, readiness and message events to the dispatcher via an
//! mpsc channel.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::WhatsAppError;

/// An event from the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// The backend needs fresh authentication; `code` is the pairing payload.
    #[serde(rename = "qr")]
    Qr {
        /// Pairing code to render as a QR symbol.
        code: String,
    },
    /// WhatsApp connection established.
    #[serde(rename = "ready")]
    Ready,
    /// A message was received (or sent by us from another device).
    #[serde(rename = "message")]
    Message {
        /// JID of the sender.
        from: String,
        /// JID of the recipient.
        to: String,
        /// Message text content.
        #[serde(default)]
        body: String,
        /// Whether this message was sent by our own account.
        #[serde(default)]
        from_me: bool,
        /// Bridge-assigned message identifier.
        #[serde(default)]
        message_id: Option<String>,
    },
    /// WhatsApp connection lost.
    #[serde(rename = "disconnected")]
    Disconnected {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Initial reconnect backoff (milliseconds).
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Pause after a non-200 poll response (seconds).
const NON_SUCCESS_PAUSE_SECS: u64 = 5;

/// Decode one poll response body.
///
/// Events the relay does not understand (unknown `type`, missing fields) are
/// logged and skipped; the rest of the batch is kept.
///
/// # Errors
///
/// Returns the serde error if the body is not a JSON array.
pub fn decode_events(body: &str) -> Result<Vec<SessionEvent>, serde_json::Error> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(body)?;
    Ok(raw
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<SessionEvent>(value) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "skipping unsupported event");
                None
            }
        })
        .collect())
}

/// Exponential reconnect delay, reset once the stream answers again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    current_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current_ms: INITIAL_BACKOFF_MS,
        }
    }
}

impl Backoff {
    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_millis(self.current_ms);
        self.current_ms = self.current_ms.saturating_mul(2).min(MAX_BACKOFF_MS);
        delay
    }

    /// Back to the initial delay.
    pub fn reset(&mut self) {
        self.current_ms = INITIAL_BACKOFF_MS;
    }
}

/// Spawn an event listener that forwards events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task and
/// reconnects automatically on disconnect with exponential backoff. It exits
/// once the receiving side of `event_tx` is dropped.
pub fn spawn_event_listener(
    base_url: String,
    poll_timeout: Duration,
    event_tx: mpsc::Sender<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{}/events/poll", base_url.trim_end_matches('/'));
        let mut backoff = Backoff::default();

        loop {
            info!(url = %poll_url, "connecting to WhatsApp event stream");

            match poll_events(&poll_url, poll_timeout, &event_tx, &mut backoff).await {
                Ok(()) => {
                    info!("WhatsApp event stream closed normally");
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, ?delay, "WhatsApp event stream error, reconnecting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    })
}

/// Poll the sidecar for events in a loop. Returns `Err` on non-timeout
/// network errors so the caller can reconnect with backoff. Any answer from
/// the sidecar resets `backoff`.
async fn poll_events(
    poll_url: &str,
    poll_timeout: Duration,
    event_tx: &mpsc::Sender<SessionEvent>,
    backoff: &mut Backoff,
) -> Result<(), WhatsAppError> {
    let client = reqwest::Client::builder().timeout(poll_timeout).build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                backoff.reset();
                let body = resp.text().await?;
                let events = match decode_events(&body) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable event batch");
                        continue;
                    }
                };
                for event in events {
                    debug!(?event, "received WhatsApp event");
                    if event_tx.send(event).await.is_err() {
                        // Receiver dropped, shut down cleanly.
                        return Ok(());
                    }
                }
            }
            Ok(resp) => {
                backoff.reset();
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(Duration::from_secs(NON_SUCCESS_PAUSE_SECS)).await;
            }
            Err(e) if e.is_timeout() => {
                // Long-poll window expired with no events.
                if event_tx.is_closed() {
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                return Err(e.into());
            }
        }
    }
}
