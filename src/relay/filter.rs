//! Inbound filter: decides which session messages reach the webhook.

use tracing::debug;

use super::{InboundMessage, RelayPayload};

/// Turn an inbound message into a webhook payload.
///
/// Messages sent by our own account are dropped, otherwise replies sent
/// through the same session would be relayed back to the webhook.
pub fn accept(message: &InboundMessage) -> Option<RelayPayload> {
    if message.from_me {
        debug!(to = %message.to, "ignoring self-originated message");
        return None;
    }
    Some(RelayPayload {
        sender: message.from.clone(),
        recipient: message.to.clone(),
        text: message.body.clone(),
    })
}
