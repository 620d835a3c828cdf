//! wa-relay: a WhatsApp to webhook message relay.
//!
//! Inbound WhatsApp messages are POSTed to an HTTP webhook as
//! `{sender, recipient, text}`; the webhook's `reply` is sent back into the
//! sender's conversation. The WhatsApp session itself lives in a sidecar
//! container that owns pairing and credential storage.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod http;
pub mod logging;
pub mod relay;
pub mod session;
pub mod whatsapp;
