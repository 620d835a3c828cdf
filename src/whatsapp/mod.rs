//! WhatsApp session backend: sidecar HTTP client, event listener and setup flow.
//!
//! The relay never speaks the WhatsApp protocol itself. A WhatsApp Web bridge
//! runs as a Docker sidecar (`wa-relay-sidecar`), owns pairing and credential
//! storage, and exposes a small HTTP API plus a long-polling event endpoint.

pub mod client;
pub mod events;
pub mod setup;

/// Errors from the WhatsApp adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    /// HTTP request to the sidecar failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sidecar container is not running or not reachable.
    #[error("sidecar not running")]
    SidecarNotRunning,

    /// The sidecar is running but WhatsApp is not connected (needs QR scan).
    #[error("not connected to WhatsApp")]
    NotConnected,

    /// The sidecar rejected a send or reply.
    #[error("send rejected ({status}): {body}")]
    SendRejected {
        /// HTTP status returned by the sidecar.
        status: reqwest::StatusCode,
        /// Response body, truncated.
        body: String,
    },

    /// The pairing code could not be rendered as a QR code.
    #[error("invalid pairing code: {0}")]
    InvalidPairingCode(String),

    /// Container setup or lifecycle operation failed.
    #[error("setup failed: {0}")]
    SetupFailed(String),
}
