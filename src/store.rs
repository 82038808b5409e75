// Ordered message log for one conversation view.
// Entries are only ever appended or confirmed in place; nothing is removed or moved.

use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::models::{CorrelationId, DeliveryState, Message};

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    by_correlation: HashMap<CorrelationId, usize>,
    by_server_id: HashMap<i64, usize>,
    seeded: bool,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn position_of_correlation(&self, correlation_id: &CorrelationId) -> Option<usize> {
        self.by_correlation.get(correlation_id).copied()
    }

    pub fn position_of_server_id(&self, server_id: i64) -> Option<usize> {
        self.by_server_id.get(&server_id).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending()).count()
    }

    /// Append at the end and return the new slot's index
    pub fn append(&mut self, message: Message) -> usize {
        let index = self.messages.len();
        self.index_entry(index, &message);
        self.messages.push(message);
        index
    }

    /// Replace the pending entry at `index` with its confirmed counterpart.
    ///
    /// Only the `Pending -> Confirmed` transition is allowed: returns false (and leaves
    /// the store untouched) if the slot is missing, already confirmed, or if
    /// `confirmed` is itself still pending.
    pub fn confirm(&mut self, index: usize, confirmed: Message) -> bool {
        let server_id = match confirmed.state {
            DeliveryState::Confirmed(id) => id,
            DeliveryState::Pending => {
                warn!("Refusing to confirm slot {} with a pending message", index);
                return false;
            }
        };

        match self.messages.get(index) {
            Some(existing) if existing.is_pending() => {}
            Some(_) => {
                debug!("Slot {} is already confirmed, leaving it untouched", index);
                return false;
            }
            None => {
                warn!("Tried to confirm unknown slot {}", index);
                return false;
            }
        }

        // The slot keeps its correlation id even if the echo omitted it
        let previous_correlation = self.messages[index].correlation_id.clone();
        let mut confirmed = confirmed;
        if confirmed.correlation_id.is_none() {
            confirmed.correlation_id = previous_correlation;
        }
        if let Some(correlation_id) = &confirmed.correlation_id {
            self.by_correlation.insert(correlation_id.clone(), index);
        }
        self.by_server_id.entry(server_id).or_insert(index);
        self.messages[index] = confirmed;
        true
    }

    /// Seed the store with already-confirmed history, once.
    ///
    /// History goes ahead of anything that arrived live before it; live entries keep
    /// their relative order. A history entry carrying the correlation id of a pending
    /// entry confirms it in place. Other history entries already present (by correlation
    /// id or server id) are skipped. Returns how many history entries were added.
    pub fn seed(&mut self, history: Vec<Message>) -> usize {
        if self.seeded {
            warn!("Message store already seeded, ignoring {} history entries", history.len());
            return 0;
        }
        self.seeded = true;

        let mut seen_correlation: HashSet<CorrelationId> = HashSet::new();
        let mut seen_server: HashSet<i64> = HashSet::new();
        let mut merged = Vec::with_capacity(history.len() + self.messages.len());

        for message in history {
            if message.is_pending() {
                warn!("Dropping pending entry found in history");
                continue;
            }
            // History proves the server took a send whose echo we never saw
            let pending_slot = message
                .correlation_id
                .as_ref()
                .and_then(|c| self.position_of_correlation(c))
                .filter(|&index| self.messages[index].is_pending());
            if let Some(index) = pending_slot {
                if let Some(c) = &message.correlation_id {
                    seen_correlation.insert(c.clone());
                }
                if let Some(id) = message.server_id() {
                    seen_server.insert(id);
                }
                if self.confirm(index, message) {
                    debug!("History confirmed pending slot {}", index);
                }
                continue;
            }
            let known_correlation = message.correlation_id.as_ref().map_or(false, |c| {
                self.by_correlation.contains_key(c) || seen_correlation.contains(c)
            });
            let known_server = message.server_id().map_or(false, |id| {
                self.by_server_id.contains_key(&id) || seen_server.contains(&id)
            });
            if known_correlation || known_server {
                debug!("Skipping history entry already in the store: {:?}", message.server_id());
                continue;
            }
            if let Some(c) = &message.correlation_id {
                seen_correlation.insert(c.clone());
            }
            if let Some(id) = message.server_id() {
                seen_server.insert(id);
            }
            merged.push(message);
        }

        let added = merged.len();
        merged.append(&mut self.messages);
        self.messages = merged;
        self.rebuild_indexes();

        debug!("Seeded store with {} history entries ({} total)", added, self.messages.len());
        added
    }

    fn index_entry(&mut self, index: usize, message: &Message) {
        if let Some(correlation_id) = &message.correlation_id {
            self.by_correlation.entry(correlation_id.clone()).or_insert(index);
        }
        if let Some(server_id) = message.server_id() {
            self.by_server_id.entry(server_id).or_insert(index);
        }
    }

    fn rebuild_indexes(&mut self) {
        self.by_correlation.clear();
        self.by_server_id.clear();
        let messages = std::mem::take(&mut self.messages);
        for (index, message) in messages.iter().enumerate() {
            self.index_entry(index, message);
        }
        self.messages = messages;
    }
}
