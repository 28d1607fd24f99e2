//! Message store for the bound session
//!
//! Holds the authoritative server list plus optimistic local messages.
//! Reconciliation follows a bounded-pending policy: a pending message
//! survives at most one merge cycle that started after it was appended.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

use crate::structs::{DeliveryState, Message};

/// Prefix of locally generated message ids.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Marks the point a fetch was issued. Pending messages appended after the
/// checkpoint cannot be in that response and are kept through the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MergeCheckpoint(u64);

/// What a merge did to the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Confirmed messages after the merge.
    pub confirmed: usize,
    /// Confirmed ids not present before the merge.
    pub new_messages: usize,
    /// Confirmed ids that disappeared from the server list.
    pub removed: usize,
    /// Pending messages replaced by their confirmed counterpart.
    pub deduplicated: usize,
    /// Pending messages dropped without a match.
    pub expired: usize,
    /// Pending messages kept for the next cycle.
    pub retained: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        self.new_messages > 0 || self.removed > 0 || self.deduplicated > 0 || self.expired > 0
    }
}

#[derive(Debug, Clone)]
struct PendingEntry {
    message: Message,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct MessageStore {
    session_id: String,
    confirmed: Vec<Message>,
    pending: Vec<PendingEntry>,
    next_seq: u64,
    match_window: Duration,
}

impl MessageStore {
    /// `match_window` bounds the timestamp distance between a pending
    /// message and the confirmed message it is deduplicated against.
    pub fn new(match_window: Duration) -> Self {
        Self {
            session_id: String::new(),
            confirmed: Vec::new(),
            pending: Vec::new(),
            next_seq: 0,
            match_window,
        }
    }

    /// Empty the store and attach it to another session.
    pub fn reset(&mut self, session_id: &str) {
        self.clear();
        self.session_id = session_id.to_string();
    }

    /// Drop every message and detach from the session.
    pub fn clear(&mut self) {
        self.session_id.clear();
        self.confirmed.clear();
        self.pending.clear();
    }

    pub fn session_id(&self) -> Option<&str> {
        if self.session_id.is_empty() {
            None
        } else {
            Some(&self.session_id)
        }
    }

    /// Insert an optimistic message at the tail.
    pub fn append(&mut self, content: &str, sender_id: &str) -> Message {
        self.push_pending(content, sender_id, Utc::now())
    }

    fn push_pending(&mut self, content: &str, sender_id: &str, created_at: DateTime<Utc>) -> Message {
        let message = Message {
            id: format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4()),
            session_id: self.session_id.clone(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            content: content.to_string(),
            created_at,
            delivery_state: DeliveryState::Pending,
        };
        self.pending.push(PendingEntry {
            message: message.clone(),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        message
    }

    /// Capture the current position before issuing a fetch.
    pub fn checkpoint(&self) -> MergeCheckpoint {
        MergeCheckpoint(self.next_seq)
    }

    /// Replace the list with the authoritative server set.
    ///
    /// Every pending message is either deduplicated or dropped.
    pub fn merge(&mut self, server_messages: Vec<Message>) -> MergeOutcome {
        let checkpoint = self.checkpoint();
        self.merge_since(server_messages, checkpoint)
    }

    /// Merge a server listing fetched at `checkpoint`.
    ///
    /// A pending message matching a just-confirmed message by sender and
    /// content within the match window is dropped. Unmatched pending messages
    /// appended before the checkpoint are dropped; later ones are retained.
    pub fn merge_since(
        &mut self,
        server_messages: Vec<Message>,
        checkpoint: MergeCheckpoint,
    ) -> MergeOutcome {
        let incoming = normalize(server_messages);
        let previous: HashSet<String> = self.confirmed.iter().map(|m| m.id.clone()).collect();
        let incoming_ids: HashSet<&str> = incoming.iter().map(|m| m.id.as_str()).collect();

        let mut outcome = MergeOutcome {
            confirmed: incoming.len(),
            new_messages: incoming
                .iter()
                .filter(|m| !previous.contains(&m.id))
                .count(),
            removed: previous
                .iter()
                .filter(|id| !incoming_ids.contains(id.as_str()))
                .count(),
            ..MergeOutcome::default()
        };

        let mut claimed = vec![false; incoming.len()];
        let mut retained = Vec::new();
        for entry in std::mem::take(&mut self.pending) {
            let matched = incoming.iter().enumerate().position(|(idx, confirmed)| {
                !claimed[idx]
                    && !previous.contains(&confirmed.id)
                    && confirmed.sender_id == entry.message.sender_id
                    && confirmed.content == entry.message.content
                    && self.within_window(confirmed.created_at, entry.message.created_at)
            });

            if let Some(idx) = matched {
                claimed[idx] = true;
                outcome.deduplicated += 1;
            } else if MergeCheckpoint(entry.seq) < checkpoint {
                tracing::debug!(
                    message_id = %entry.message.id,
                    "dropping unconfirmed pending message"
                );
                outcome.expired += 1;
            } else {
                retained.push(entry);
            }
        }

        outcome.retained = retained.len();
        self.confirmed = incoming;
        self.pending = retained;
        outcome
    }

    fn within_window(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        (a - b)
            .abs()
            .to_std()
            .map(|distance| distance <= self.match_window)
            .unwrap_or(false)
    }

    /// Confirmed messages in order, followed by pending ones in append order.
    pub fn messages(&self) -> Vec<Message> {
        self.confirmed
            .iter()
            .cloned()
            .chain(self.pending.iter().map(|entry| entry.message.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Mark as confirmed, collapse duplicate ids (last occurrence wins) and sort.
fn normalize(server_messages: Vec<Message>) -> Vec<Message> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Message> = Vec::with_capacity(server_messages.len());
    for mut message in server_messages {
        message.delivery_state = DeliveryState::Confirmed;
        match index.get(&message.id) {
            Some(&pos) => out[pos] = message,
            None => {
                index.insert(message.id.clone(), out.len());
                out.push(message);
            }
        }
    }
    out.sort_by(Message::chronological);
    out
}
