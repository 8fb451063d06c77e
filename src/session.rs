//! Per-session conversation state with bounded retention.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::llm::{ChatMessage, Role};
use crate::vector_index::VectorIndex;

/// One recorded message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    /// Speaker.
    pub role: Role,
    /// Text exactly as delivered.
    pub text: String,
}

impl ConversationTurn {
    /// Prompt message carrying this turn.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.text.clone(),
        }
    }
}

/// Session addressed by clients that send the literal id `default`.
pub const SHARED_SESSION_ID: Uuid = Uuid::from_u128(1);

/// Mutable state of a single session. Reached through a [`SessionHandle`].
pub struct Session {
    history: VecDeque<ConversationTurn>,
    index: Option<Arc<dyn VectorIndex>>,
    document_name: Option<String>,
    max_history_turns: usize,
}

/// Shared handle; lock it for the duration of a chat turn.
pub type SessionHandle = Arc<Mutex<Session>>;

impl Session {
    fn new(max_history_turns: usize) -> Self {
        Self {
            history: VecDeque::new(),
            index: None,
            document_name: None,
            max_history_turns: max_history_turns.max(1),
        }
    }

    /// Full retained history, oldest first.
    pub fn history(&self) -> &VecDeque<ConversationTurn> {
        &self.history
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.history.len().saturating_sub(n);
        self.history.iter().skip(skip).cloned().collect()
    }

    /// Appends a turn, dropping the oldest beyond the history cap.
    pub fn push_turn(&mut self, role: Role, text: impl Into<String>) {
        self.history.push_back(ConversationTurn {
            role,
            text: text.into(),
        });
        while self.history.len() > self.max_history_turns {
            self.history.pop_front();
        }
    }

    /// Index built from this session's own upload.
    pub fn index(&self) -> Option<Arc<dyn VectorIndex>> {
        self.index.clone()
    }

    /// File name of the uploaded document.
    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }

    /// Replaces the session index in one swap.
    pub fn attach_index(&mut self, index: Arc<dyn VectorIndex>, document_name: Option<String>) {
        self.index = Some(index);
        self.document_name = document_name;
    }
}

struct Entry {
    handle: SessionHandle,
    last_active: Instant,
}

/// Session id to session state, bounded by LRU capacity and idle TTL.
///
/// The outer map lock is only held for lookups; model calls happen under the
/// per-session mutex.
pub struct SessionStore {
    sessions: Mutex<LruCache<Uuid, Entry>>,
    ttl: Option<Duration>,
    max_history_turns: usize,
    default_index: RwLock<Option<Arc<dyn VectorIndex>>>,
}

impl SessionStore {
    /// Creates an empty store.
    pub fn new(config: &SessionConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_sessions).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            ttl: config.session_ttl,
            max_history_turns: config.max_history_turns,
            default_index: RwLock::new(None),
        }
    }

    /// Returns the live session for `id`, creating it when absent or expired.
    pub fn get_or_create(&self, id: Uuid) -> SessionHandle {
        self.get_or_create_at(id, Instant::now())
    }

    fn get_or_create_at(&self, id: Uuid, now: Instant) -> SessionHandle {
        let mut sessions = lock(&self.sessions);
        if let Some(entry) = sessions.get_mut(&id) {
            if !self.is_expired(entry, now) {
                entry.last_active = now;
                return Arc::clone(&entry.handle);
            }
            tracing::debug!(session_id = %id, "session expired; starting fresh");
        }
        let handle = Arc::new(Mutex::new(Session::new(self.max_history_turns)));
        let entry = Entry {
            handle: Arc::clone(&handle),
            last_active: now,
        };
        if let Some((evicted, _)) = sessions.push(id, entry) {
            if evicted != id {
                tracing::info!(session_id = %evicted, "evicted least recently used session");
            }
        }
        handle
    }

    /// Live session for `id` without creating one.
    pub fn get(&self, id: Uuid) -> Option<SessionHandle> {
        let now = Instant::now();
        let mut sessions = lock(&self.sessions);
        let expired = match sessions.get_mut(&id) {
            Some(entry) if !self.is_expired(entry, now) => {
                entry.last_active = now;
                return Some(Arc::clone(&entry.handle));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            sessions.pop(&id);
        }
        None
    }

    /// Appends one turn to `id`, creating the session if needed.
    pub fn append_turn(&self, id: Uuid, role: Role, text: impl Into<String>) {
        let handle = self.get_or_create(id);
        let mut session = lock(&handle);
        session.push_turn(role, text);
    }

    /// The session's own index, else the default index, else nothing.
    pub fn index_for(&self, id: Uuid) -> Option<Arc<dyn VectorIndex>> {
        self.get(id)
            .and_then(|handle| lock(&handle).index())
            .or_else(|| self.default_index())
    }

    /// Publishes a fully built index for `id`.
    pub fn attach_index(&self, id: Uuid, index: Arc<dyn VectorIndex>, document_name: Option<String>) {
        let handle = self.get_or_create(id);
        let mut session = lock(&handle);
        session.attach_index(index, document_name);
    }

    /// Snapshot of the retained history for `id` (empty when unknown).
    pub fn history(&self, id: Uuid) -> Vec<ConversationTurn> {
        self.get(id)
            .map(|handle| lock(&handle).history().iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sessions currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// True when no sessions are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every session idle past the TTL; returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let mut sessions = lock(&self.sessions);
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            sessions.pop(id);
        }
        if !expired.is_empty() {
            tracing::info!(evicted = expired.len(), remaining = sessions.len(), "swept idle sessions");
        }
        expired.len()
    }

    /// Index shared by sessions that never uploaded.
    pub fn default_index(&self) -> Option<Arc<dyn VectorIndex>> {
        self.default_index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Installs (or replaces) the default index.
    pub fn set_default_index(&self, index: Arc<dyn VectorIndex>) {
        *self
            .default_index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(index);
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(entry.last_active) > ttl)
    }
}

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
