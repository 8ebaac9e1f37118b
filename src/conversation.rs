//! Per-user conversational state.
//!
//! Every user gets an entry behind its own async mutex. Holding the guard for
//! the whole match serializes two rapid messages from the same user, while
//! different users never wait on each other. The outer map lock is only held
//! to look up, insert or evict an entry.

use crate::types::ScoredCandidate;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Candidates awaiting a numeric reply
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSelection {
    pub candidates: Vec<ScoredCandidate>,
}

impl PendingSelection {
    /// Candidate for a 1-based menu number
    pub fn pick(&self, number: usize) -> Option<&ScoredCandidate> {
        number
            .checked_sub(1)
            .and_then(|index| self.candidates.get(index))
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Recent messages and pending menu for one user
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    history: VecDeque<String>,
    limit: usize,
    pending: Option<PendingSelection>,
}

impl ConversationEntry {
    pub fn new(limit: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(limit),
            limit: limit.max(1),
            pending: None,
        }
    }

    /// Record a message, dropping the oldest beyond the limit
    pub fn push_message(&mut self, text: &str) {
        self.history.push_back(text.to_string());
        while self.history.len() > self.limit {
            self.history.pop_front();
        }
    }

    /// Oldest first
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn pending(&self) -> Option<&PendingSelection> {
        self.pending.as_ref()
    }

    pub fn set_pending(&mut self, candidates: Vec<ScoredCandidate>) {
        self.pending = Some(PendingSelection { candidates });
    }

    pub fn clear_pending(&mut self) -> Option<PendingSelection> {
        self.pending.take()
    }
}

struct Slot {
    entry: Arc<AsyncMutex<ConversationEntry>>,
    last_seen: Instant,
}

/// Bounded map of user id -> conversation entry
pub struct ConversationStore {
    users: Mutex<HashMap<String, Slot>>,
    history_limit: usize,
    capacity: usize,
    ttl: Duration,
}

impl ConversationStore {
    pub fn new(history_limit: usize, capacity: usize, ttl: Duration) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            history_limit,
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Exclusive access to a user's entry, created on first use
    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<ConversationEntry> {
        let entry = {
            let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();

            // An idle entry past its TTL starts over, pending menu included
            let expired = users.get(user_id).is_some_and(|slot| {
                Self::is_idle(slot) && now.duration_since(slot.last_seen) >= self.ttl
            });
            if expired {
                users.remove(user_id);
            }

            if !users.contains_key(user_id) && users.len() >= self.capacity {
                Self::evict(&mut users, now, self.ttl, self.capacity);
            }

            let slot = users.entry(user_id.to_string()).or_insert_with(|| Slot {
                entry: Arc::new(AsyncMutex::new(ConversationEntry::new(self.history_limit))),
                last_seen: now,
            });
            slot.last_seen = now;
            Arc::clone(&slot.entry)
        };

        entry.lock_owned().await
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of tracked users
    pub fn len(&self) -> usize {
        self.users.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every idle entry older than the TTL
    pub fn evict_expired(&self) -> usize {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let before = users.len();
        let now = Instant::now();
        users.retain(|_, slot| !Self::is_idle(slot) || now.duration_since(slot.last_seen) < self.ttl);
        before - users.len()
    }

    /// Entries still referenced elsewhere are in use and never evicted
    fn is_idle(slot: &Slot) -> bool {
        Arc::strong_count(&slot.entry) == 1
    }

    fn evict(users: &mut HashMap<String, Slot>, now: Instant, ttl: Duration, capacity: usize) {
        users.retain(|_, slot| !Self::is_idle(slot) || now.duration_since(slot.last_seen) < ttl);

        // Still full: drop the least recently seen idle entry
        if users.len() >= capacity {
            let oldest = users
                .iter()
                .filter(|(_, slot)| Self::is_idle(slot))
                .min_by_key(|(_, slot)| slot.last_seen)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                users.remove(&key);
            }
        }
    }
}
