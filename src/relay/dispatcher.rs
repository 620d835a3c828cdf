//! Dispatcher loop: session events in, one relay task per message out.
//!
//! Messages are filtered in delivery order on the loop itself, then each
//! accepted message is forwarded on its own task. Tasks are not serialized
//! per sender, so replies can reach a conversation in a different order than
//! the inbound messages arrived.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::filter;
use super::forwarder::WebhookForwarder;
use super::{InboundMessage, RelayError, RelayOutcome};
use crate::session::{Session, SessionBootstrap, SessionState};
use crate::whatsapp::events::SessionEvent;

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages received from the session.
    pub received: u64,
    /// Self-originated messages dropped by the filter.
    pub ignored: u64,
    /// Webhook replies delivered.
    pub replied: u64,
    /// Webhook answers without a reply.
    pub no_reply: u64,
    /// Fallback messages delivered.
    pub fallback: u64,
    /// Tasks that ended in an error (fallback undeliverable, panic).
    pub failed: u64,
    /// Tasks still running when the shutdown timeout expired.
    pub abandoned: u64,
}

/// Owns the session handle, the forwarder and all in-flight relay tasks.
pub struct Dispatcher {
    forwarder: Arc<WebhookForwarder>,
    session: Arc<dyn Session>,
    bootstrap: SessionBootstrap,
    tasks: JoinSet<Result<RelayOutcome, RelayError>>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create a dispatcher with no tasks in flight.
    pub fn new(
        forwarder: Arc<WebhookForwarder>,
        session: Arc<dyn Session>,
        bootstrap: SessionBootstrap,
    ) -> Self {
        Self {
            forwarder,
            session,
            bootstrap,
            tasks: JoinSet::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Current session state as seen by the bootstrap tracker.
    pub fn session_state(&self) -> SessionState {
        self.bootstrap.state()
    }

    /// Number of relay tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Process events until the channel closes or `shutdown` resolves, then
    /// wait up to `shutdown_timeout` for in-flight messages.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        shutdown: impl Future<Output = ()>,
        shutdown_timeout: Duration,
    ) -> DispatchStats {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("event channel closed");
                        break;
                    };
                    self.handle_event(event);
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.record(joined);
                }
                () = &mut shutdown => {
                    info!("shutdown requested, no longer accepting messages");
                    break;
                }
            }
        }

        self.drain(shutdown_timeout).await;
        info!(stats = ?self.stats, "dispatcher stopped");
        self.stats
    }

    /// Route one session event. Accepted messages are spawned immediately.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Qr { code } => self.bootstrap.on_pairing_code(&code),
            SessionEvent::Ready => self.bootstrap.on_ready(),
            SessionEvent::Disconnected { reason } => {
                self.bootstrap.on_disconnected(reason.as_deref());
            }
            SessionEvent::Message {
                from,
                to,
                body,
                from_me,
                message_id,
            } => self.handle_message(InboundMessage {
                from,
                to,
                body,
                from_me,
                message_id,
            }),
        }
    }

    fn handle_message(&mut self, message: InboundMessage) {
        self.stats.received = self.stats.received.saturating_add(1);
        info!(from = %message.from, from_me = message.from_me, "inbound message");
        debug!(body = %message.body, "inbound message body");

        let Some(payload) = filter::accept(&message) else {
            self.stats.ignored = self.stats.ignored.saturating_add(1);
            return;
        };

        let span = info_span!("relay", relay_id = %Uuid::new_v4(), sender = %payload.sender);
        let forwarder = Arc::clone(&self.forwarder);
        let session = Arc::clone(&self.session);
        let conversation = message.conversation();
        self.tasks.spawn(
            async move {
                forwarder
                    .relay(session.as_ref(), payload, conversation)
                    .await
            }
            .instrument(span),
        );
    }

    fn record(&mut self, joined: Result<Result<RelayOutcome, RelayError>, JoinError>) {
        match joined {
            Ok(Ok(outcome)) => {
                let counter = match outcome {
                    RelayOutcome::Replied => &mut self.stats.replied,
                    RelayOutcome::NoReply => &mut self.stats.no_reply,
                    RelayOutcome::Fallback => &mut self.stats.fallback,
                };
                *counter = counter.saturating_add(1);
            }
            Ok(Err(e)) => {
                error!(error = %e, "fallback message could not be delivered");
                self.stats.failed = self.stats.failed.saturating_add(1);
            }
            Err(e) if e.is_cancelled() => {
                debug!("relay task cancelled");
            }
            Err(e) => {
                error!(error = %e, "relay task panicked");
                self.stats.failed = self.stats.failed.saturating_add(1);
            }
        }
    }

    /// Wait for in-flight tasks, aborting whatever is left after `timeout`.
    async fn drain(&mut self, timeout: Duration) {
        if self.tasks.is_empty() {
            return;
        }
        info!(
            pending = self.tasks.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for in-flight messages"
        );

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = self.tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    self.record(joined);
                }
                () = &mut deadline => {
                    let remaining = self.tasks.len();
                    warn!(remaining, "shutdown timeout exceeded, abandoning in-flight messages");
                    self.stats.abandoned = u64::try_from(remaining).unwrap_or(u64::MAX);
                    self.tasks.abort_all();
                    break;
                }
            }
        }
    }
}
