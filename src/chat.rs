// Conversation view state: a transport session plus the reconciliation engine.
// Everything here runs on the owner's task; no locking is needed.

use log::{info, warn};

use crate::api::HistoryLoader;
use crate::config::ClientConfig;
use crate::models::{CorrelationId, InboundMessage, LocalIdentity, Message};
use crate::reconcile::{Reconciled, Reconciler};
use crate::stomp::SessionHandle;

pub struct ChatClient {
    identity: LocalIdentity,
    reconciler: Reconciler,
    session: SessionHandle,
}

impl ChatClient {
    /// Open the view for `inquiry_id` and start connecting in the background
    pub fn open(config: &ClientConfig, inquiry_id: i64, identity: LocalIdentity, token: Option<&str>) -> Self {
        info!("Opening conversation {}", inquiry_id);
        let session = SessionHandle::open(config, inquiry_id, token);
        Self::with_session(session, identity)
    }

    pub fn with_session(session: SessionHandle, identity: LocalIdentity) -> Self {
        ChatClient {
            reconciler: Reconciler::new(identity.role),
            identity,
            session,
        }
    }

    pub fn inquiry_id(&self) -> i64 {
        self.session.inquiry_id()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// Current ordered view
    pub fn messages(&self) -> &[Message] {
        self.reconciler.messages()
    }

    pub fn pending_count(&self) -> usize {
        self.reconciler.store().pending_count()
    }

    pub fn connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Optimistically send `content`. Blank input or a disconnected session is a no-op.
    pub fn send_message(&mut self, content: &str) -> Option<CorrelationId> {
        self.reconciler.on_send(content, &self.session)
    }

    pub fn seed_history(&mut self, history: Vec<InboundMessage>) -> usize {
        self.reconciler.seed_history(history)
    }

    /// Fetch and seed history. Failures are logged and leave the view as it was.
    pub async fn load_history<L: HistoryLoader + ?Sized>(&mut self, loader: &L) -> bool {
        let inquiry_id = self.inquiry_id();
        match loader.load_history(inquiry_id).await {
            Ok(history) => {
                let added = self.seed_history(history);
                info!("Loaded {} history message(s) for inquiry {}", added, inquiry_id);
                true
            }
            Err(e) => {
                warn!("Failed to load history for inquiry {}: {}", inquiry_id, e);
                false
            }
        }
    }

    /// Wait for the next inbound event and apply it. `None` once the session has ended.
    pub async fn next_update(&mut self) -> Option<Reconciled> {
        let body = self.session.recv().await?;
        Some(self.reconciler.on_inbound_body(&body))
    }

    /// Apply every inbound event already buffered; returns how many changed the view
    pub fn apply_pending_events(&mut self) -> usize {
        let mut changed = 0;
        while let Some(body) = self.session.try_recv() {
            if self.reconciler.on_inbound_body(&body).changed_store() {
                changed += 1;
            }
        }
        changed
    }

    /// Leave the conversation: unsubscribe and disconnect
    pub async fn close(self) {
        info!("Closing conversation {}", self.inquiry_id());
        self.session.close().await;
    }
}
