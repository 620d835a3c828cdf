//! Message relay: inbound filter, webhook forwarder and dispatcher.
//!
//! Each accepted inbound message becomes a [`RelayPayload`], is POSTed to the
//! webhook, and the webhook's `reply` (if any) is sent back into the sender's
//! conversation. Failures on that path turn into a fallback message.

pub mod dispatcher;
pub mod filter;
pub mod forwarder;

use serde::{Deserialize, Serialize};

use crate::session::Conversation;
use crate::whatsapp::WhatsAppError;

/// A message delivered by the session, before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// JID of the sender.
    pub from: String,
    /// JID of the recipient (our account).
    pub to: String,
    /// Text body.
    pub body: String,
    /// Whether our own account sent it.
    pub from_me: bool,
    /// Bridge-assigned message id, used to quote the reply.
    pub message_id: Option<String>,
}

impl InboundMessage {
    /// The conversation replies to this message go into.
    pub fn conversation(&self) -> Conversation {
        Conversation {
            jid: self.from.clone(),
            message_id: self.message_id.clone(),
        }
    }
}

/// JSON body POSTed to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayPayload {
    /// Sender JID (`InboundMessage::from`).
    pub sender: String,
    /// Recipient JID (`InboundMessage::to`).
    pub recipient: String,
    /// Message text (`InboundMessage::body`).
    pub text: String,
}

/// Decoded webhook response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WebhookResponse {
    /// Text to send back to the sender.
    #[serde(default)]
    pub reply: Option<String>,
}

impl WebhookResponse {
    /// The reply text, if present and not blank.
    pub fn reply_text(&self) -> Option<&str> {
        self.reply.as_deref().filter(|r| !r.trim().is_empty())
    }
}

/// What happened to one forwarded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The webhook's reply was delivered.
    Replied,
    /// The webhook answered without a reply; nothing was sent.
    NoReply,
    /// The forward or reply failed and the fallback message was delivered.
    Fallback,
}

/// Errors on the forward/reply path.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The webhook could not be reached or timed out.
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with a non-2xx status.
    #[error("webhook returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body, truncated.
        body: String,
    },

    /// The webhook answered 2xx with a body that is not the expected JSON.
    #[error("webhook response is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// Sending through the session failed.
    #[error("session send failed: {0}")]
    Session(#[from] WhatsAppError),
}
