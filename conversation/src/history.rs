//! Per-session conversation history.
//!
//! [`SessionHistoryStore`] owns every history. A turn takes the session's
//! lock through [`SessionHistoryStore::lock`] and holds it until both of
//! its messages are committed, so turns on one session never interleave
//! while turns on different sessions run in parallel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{ConversationError, Result};

const MAX_SESSION_ID_LEN: usize = 128;

/// Opaque client-chosen conversation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate a client-supplied id: 1 to 128 characters of `[A-Za-z0-9_-]`.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw))
        } else {
            Err(ConversationError::InvalidSession(raw))
        }
    }

    /// A fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ConversationError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant => f.write_str("assistant"),
        }
    }
}

/// One committed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            at: Utc::now(),
        }
    }
}

/// Ordered turns of one session, alternating user and assistant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Role the next appended turn must have.
    pub fn next_role(&self) -> Role {
        match self.turns.last() {
            Some(turn) if turn.role == Role::User => Role::Assistant,
            _ => Role::User,
        }
    }

    /// True when every user turn has its answer.
    pub fn is_complete(&self) -> bool {
        self.turns.len() % 2 == 0
    }

    /// Append one turn, rejecting it if it breaks alternation.
    pub fn push(&mut self, turn: Turn) -> Result<()> {
        let expected = self.next_role();
        if turn.role != expected {
            return Err(ConversationError::InvalidState(format!(
                "expected a {expected} turn after {} turns, got {}",
                self.turns.len(),
                turn.role
            )));
        }
        self.turns.push(turn);
        Ok(())
    }
}

struct Session {
    history: Arc<Mutex<ConversationHistory>>,
    // Milliseconds since the store's epoch.
    last_active: AtomicU64,
}

/// Exclusive access to one session's history for the length of a turn.
pub struct SessionGuard {
    session_id: SessionId,
    history: OwnedMutexGuard<ConversationHistory>,
    session: Arc<Session>,
    epoch: Instant,
}

impl SessionGuard {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// History as of now; stable while the guard is held.
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Append a user turn and its answer together.
    ///
    /// Either both turns land or neither does.
    pub fn commit_exchange(
        &mut self,
        user: impl Into<String>,
        assistant: impl Into<String>,
    ) -> Result<()> {
        if !self.history.is_complete() {
            return Err(ConversationError::InvalidState(format!(
                "session {} has an unanswered user turn",
                self.session_id
            )));
        }
        self.history.push(Turn::user(user))?;
        self.history.push(Turn::assistant(assistant))?;
        self.session
            .last_active
            .store(elapsed_ms(self.epoch), Ordering::Relaxed);
        Ok(())
    }
}

fn elapsed_ms(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

/// Owner of all session histories.
pub struct SessionHistoryStore {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    epoch: Instant,
}

impl Default for SessionHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHistoryStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    async fn session(&self, session_id: &SessionId) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Created session");
                Arc::new(Session {
                    history: Arc::new(Mutex::new(ConversationHistory::new())),
                    last_active: AtomicU64::new(elapsed_ms(self.epoch)),
                })
            })
            .clone()
    }

    /// Snapshot of the session's history, creating an empty one on first use.
    pub async fn get_or_create(&self, session_id: &SessionId) -> ConversationHistory {
        let session = self.session(session_id).await;
        let history = session.history.lock().await;
        history.clone()
    }

    /// Append a single turn.
    pub async fn append(&self, session_id: &SessionId, turn: Turn) -> Result<()> {
        let mut guard = self.lock(session_id).await;
        guard.history.push(turn)?;
        guard
            .session
            .last_active
            .store(elapsed_ms(self.epoch), Ordering::Relaxed);
        Ok(())
    }

    /// Wait for exclusive access to the session.
    pub async fn lock(&self, session_id: &SessionId) -> SessionGuard {
        let session = self.session(session_id).await;
        let history = session.history.clone().lock_owned().await;
        session
            .last_active
            .store(elapsed_ms(self.epoch), Ordering::Relaxed);
        SessionGuard {
            session_id: session_id.clone(),
            history,
            session,
            epoch: self.epoch,
        }
    }

    /// Drop sessions idle for longer than `ttl`. Sessions in use are kept.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let now = elapsed_ms(self.epoch);
        let ttl_ms = ttl.as_millis() as u64;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        // Nobody else holds a handle while the map is write-locked and the
        // count is one, so the session cannot be mid-turn.
        sessions.retain(|_, session| {
            let idle = now.saturating_sub(session.last_active.load(Ordering::Relaxed));
            Arc::strong_count(session) > 1 || idle <= ttl_ms
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, ttl: Duration, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.evict_idle(ttl).await;
            }
        })
    }

    /// Forget one session. Returns whether it existed.
    pub async fn remove(&self, session_id: &SessionId) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    /// Forget every session.
    pub async fn clear(&self) {
        self.sessions.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::parse("abc").is_ok());
        assert!(SessionId::parse("a-b_C9").is_ok());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("x".repeat(129)).is_err());
        assert_eq!(SessionId::generate().as_str().len(), 36);
    }

    #[test]
    fn test_history_rejects_out_of_order_turns() {
        let mut history = ConversationHistory::new();
        assert!(matches!(
            history.push(Turn::assistant("hi")),
            Err(ConversationError::InvalidState(_))
        ));

        history.push(Turn::user("hello")).unwrap();
        assert!(history.push(Turn::user("again")).is_err());
        history.push(Turn::assistant("hi")).unwrap();
        assert!(history.is_complete());
        assert_eq!(history.next_role(), Role::User);
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = SessionHistoryStore::new();
        let id = sid("abc");

        assert!(store.get_or_create(&id).await.is_empty());
        assert!(store.get_or_create(&id).await.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_commit_exchange_appends_pair() {
        let store = SessionHistoryStore::new();
        let id = sid("abc");

        {
            let mut guard = store.lock(&id).await;
            guard.commit_exchange("which buds are cheap?", "BudgetBuds X1.").unwrap();
        }

        let history = store.get_or_create(&id).await;
        let roles: Vec<Role> = history.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(history.turns()[1].text, "BudgetBuds X1.");
    }

    #[tokio::test]
    async fn test_commit_after_dangling_user_turn_fails() {
        let store = SessionHistoryStore::new();
        let id = sid("abc");
        store.append(&id, Turn::user("hello")).await.unwrap();

        let mut guard = store.lock(&id).await;
        let err = guard.commit_exchange("again", "answer").unwrap_err();
        assert!(matches!(err, ConversationError::InvalidState(_)));
        assert_eq!(guard.history().len(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_locked_sessions() {
        let store = SessionHistoryStore::new();
        let idle = sid("idle");
        let busy = sid("busy");
        store.get_or_create(&idle).await;
        let _guard = store.lock(&busy).await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        let evicted = store.evict_idle(Duration::from_millis(5)).await;

        assert_eq!(evicted, 1);
        assert_eq!(store.len().await, 1);
        assert!(!store.remove(&idle).await);
        assert!(store.remove(&busy).await);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = SessionHistoryStore::new();
        store.get_or_create(&sid("a")).await;
        store.get_or_create(&sid("b")).await;

        store.clear().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let store = Arc::new(SessionHistoryStore::new());
        store.get_or_create(&sid("abc")).await;

        let handle = store.spawn_sweeper(Duration::from_millis(1), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.is_empty().await);
        handle.abort();
    }
}
