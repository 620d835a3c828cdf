//! Messaging session seam and bootstrap state.
//!
//! [`Session`] is the only surface the relay needs from the messaging
//! backend: replying inside a conversation. The production implementation is
//! [`crate::whatsapp::client::WhatsAppClient`]; tests substitute a recorder.

use async_trait::async_trait;
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use tracing::{info, warn};

use crate::whatsapp::WhatsAppError;

/// The conversation a reply is sent into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// WhatsApp JID of the chat (the inbound message's sender).
    pub jid: String,
    /// Identifier of the inbound message the reply answers, if known.
    pub message_id: Option<String>,
}

/// Outbound side of a messaging session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Reply with `text` in `conversation`, quoting the original message when
    /// its id is known.
    async fn reply(&self, conversation: &Conversation, text: &str) -> Result<(), WhatsAppError>;
}

/// Lifecycle of the session as observed from sidecar events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No pairing code or readiness seen yet, or the connection dropped.
    Unauthenticated,
    /// A pairing code was shown and is waiting to be scanned.
    AwaitingPairing,
    /// Connected and able to send.
    Ready,
}

/// Tracks session bootstrap and surfaces pairing codes to the operator.
///
/// There is no timeout: the session may stay in
/// [`SessionState::AwaitingPairing`] until the process is killed.
#[derive(Debug)]
pub struct SessionBootstrap {
    state: SessionState,
    print_qr: bool,
}

impl SessionBootstrap {
    /// Create a tracker in [`SessionState::Unauthenticated`].
    ///
    /// With `print_qr` set, pairing codes are rendered to stdout as a QR code.
    pub fn new(print_qr: bool) -> Self {
        Self {
            state: SessionState::Unauthenticated,
            print_qr,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A new pairing code arrived. Repeated codes are shown again.
    pub fn on_pairing_code(&mut self, code: &str) {
        self.state = SessionState::AwaitingPairing;
        info!("pairing code received, scan it with WhatsApp on your phone");
        if self.print_qr {
            println!("{}", pairing_display(code));
        }
        tracing::debug!(code, "pairing code");
    }

    /// The sidecar reported a connected session.
    pub fn on_ready(&mut self) {
        if self.state != SessionState::Ready {
            info!("WhatsApp session is ready");
        }
        self.state = SessionState::Ready;
    }

    /// The sidecar lost its connection.
    pub fn on_disconnected(&mut self, reason: Option<&str>) {
        warn!(reason = reason.unwrap_or("unknown"), "WhatsApp session disconnected");
        self.state = SessionState::Unauthenticated;
    }
}

/// Render a pairing code as a terminal QR code.
///
/// # Errors
///
/// Returns [`WhatsAppError::InvalidPairingCode`] if the code does not fit in
/// a QR symbol.
pub fn render_pairing_qr(code: &str) -> Result<String, WhatsAppError> {
    let qr = QrCode::new(code.as_bytes())
        .map_err(|e| WhatsAppError::InvalidPairingCode(e.to_string()))?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// What the operator sees for a pairing code: the QR symbol, or the raw
/// code when it cannot be rendered.
pub fn pairing_display(code: &str) -> String {
    match render_pairing_qr(code) {
        Ok(qr) => qr,
        Err(e) => {
            warn!(error = %e, "could not render pairing QR, printing the raw code");
            format!("Pairing code: {code}")
        }
    }
}
