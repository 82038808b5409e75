// Reconciliation of optimistic local sends with the server's authoritative stream.
//
// Inbound messages are matched strictly by correlation id (never by content or time):
//   1. correlation id of a pending entry  -> confirm that slot in place
//   2. correlation id of a confirmed entry -> duplicate delivery, dropped
//   3. anything else                       -> appended at the end
// An uncorrelated message whose server id is already confirmed is a replay and is
// dropped as well, so applying the same event twice never changes the store.

use log::{debug, info, warn};

use crate::models::{CorrelationId, InboundMessage, Message, OutboundMessage, SenderRole};
use crate::store::MessageStore;

/// The outbound half of a transport, as seen by the engine
pub trait Publisher {
    fn is_connected(&self) -> bool;

    /// Hand an event to the transport. Returns false if it was not accepted.
    fn publish(&self, message: OutboundMessage) -> bool;
}

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A pending slot was confirmed in place
    Confirmed(usize),
    /// Already known; store unchanged
    Duplicate(usize),
    /// New entry at this index
    Appended(usize),
    /// Body could not be parsed; store unchanged
    Malformed,
}

impl Reconciled {
    pub fn changed_store(&self) -> bool {
        matches!(self, Reconciled::Confirmed(_) | Reconciled::Appended(_))
    }
}

#[derive(Debug)]
pub struct Reconciler {
    store: MessageStore,
    role: SenderRole,
}

impl Reconciler {
    /// `role` is stamped on optimistic entries until the server echo replaces them
    pub fn new(role: SenderRole) -> Self {
        Reconciler {
            store: MessageStore::new(),
            role,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// Seed with history from the request/response API. Only the first call has effect.
    pub fn seed_history(&mut self, history: Vec<InboundMessage>) -> usize {
        let messages = history.into_iter().map(Message::from).collect();
        self.store.seed(messages)
    }

    /// Optimistically append `content` and publish it.
    ///
    /// Blank content and a disconnected publisher are silent no-ops: the store is not
    /// touched and `publish` is never called. Returns the correlation id of the send.
    pub fn on_send<P: Publisher + ?Sized>(&mut self, content: &str, publisher: &P) -> Option<CorrelationId> {
        if content.trim().is_empty() {
            debug!("Ignoring send of blank message");
            return None;
        }
        if !publisher.is_connected() {
            debug!("Ignoring send while disconnected");
            return None;
        }

        let correlation_id = CorrelationId::generate();
        let outbound = OutboundMessage::new(content, &correlation_id);

        // Local append strictly precedes the network call so the echo always finds its slot
        let slot = self
            .store
            .append(Message::pending(content, correlation_id.clone(), self.role));
        debug!("Appended pending message {} at slot {}", correlation_id, slot);

        if !publisher.publish(outbound) {
            warn!("Transport did not accept message {}; it stays pending", correlation_id);
        }
        Some(correlation_id)
    }

    pub fn on_inbound(&mut self, inbound: InboundMessage) -> Reconciled {
        let message = Message::from(inbound);

        if let Some(correlation_id) = &message.correlation_id {
            if let Some(index) = self.store.position_of_correlation(correlation_id) {
                let pending = self.store.get(index).map_or(false, |m| m.is_pending());
                if pending && self.store.confirm(index, message.clone()) {
                    info!("Confirmed message {} at slot {}", correlation_id, index);
                    return Reconciled::Confirmed(index);
                }
                debug!("Dropping duplicate delivery of {}", correlation_id);
                return Reconciled::Duplicate(index);
            }
        }

        if let Some(server_id) = message.server_id() {
            if let Some(index) = self.store.position_of_server_id(server_id) {
                debug!("Dropping replay of server message {}", server_id);
                return Reconciled::Duplicate(index);
            }
        }

        let index = self.store.append(message);
        debug!("Appended inbound message at slot {}", index);
        Reconciled::Appended(index)
    }

    /// Parse and apply a raw broker body. Malformed bodies are dropped whole.
    pub fn on_inbound_body(&mut self, body: &str) -> Reconciled {
        match InboundMessage::from_json(body) {
            Ok(inbound) => self.on_inbound(inbound),
            Err(e) => {
                warn!("Dropping malformed inbound message: {}", e);
                Reconciled::Malformed
            }
        }
    }
}
