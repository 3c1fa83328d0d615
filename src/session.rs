//! Per-(user, channel) conversational memory
//!
//! A [`Session`] keeps the ordered message history of one conversation, with
//! each entry tagged by its token cost. Every append evicts from the front
//! until the total fits the budget (`max_tokens - reserved_margin`), so the
//! history is always a suffix of what was appended. The newest message is
//! never evicted, even when it alone exceeds the budget.
//!
//! Channel sessions go stale after `ttl` of inactivity; direct-message sessions
//! never expire on their own.
//!
//! The [`SessionStore`] owns all sessions. Lookups create sessions lazily and
//! replace stale ones with fresh, empty sessions under the same key.
//!
//! ```rust
//! use chat_relay::{ChatMessage, SessionConfig, SessionKind, SessionStore};
//!
//! # async fn example() {
//! let store = SessionStore::new(SessionConfig::default());
//! let session = store.get(SessionKind::Channel, "U1", "C1").await;
//! let mut session = session.lock().await;
//! let total = session.add_history(ChatMessage::user("Hello"));
//! assert_eq!(total, session.prompt_tokens());
//! # }
//! ```

use crate::context::{ApproximateTokenCounter, TokenCounter};
use crate::functions::FunctionDefinition;
use crate::types::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Whether a session belongs to a direct conversation or a shared channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Direct or multi-party direct message; never auto-expires
    Direct,
    /// Public or private channel; expires after the idle TTL
    Channel,
}

impl SessionKind {
    /// Map a chat platform channel type to a session kind.
    ///
    /// `im` and `mpim` are direct conversations; everything else is a channel.
    pub fn from_channel_type(channel_type: &str) -> Self {
        match channel_type {
            "im" | "mpim" => SessionKind::Direct,
            _ => SessionKind::Channel,
        }
    }
}

/// Composite session identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user: String,
    pub channel: String,
}

impl SessionKey {
    pub fn new(user: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            channel: channel.into(),
        }
    }
}

/// Token budget and expiry settings shared by every session in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Total context window in tokens
    pub max_tokens: usize,
    /// Tokens held back for the model's response
    pub reserved_margin: usize,
    /// Idle time after which a channel session is stale
    pub ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            reserved_margin: 1000,
            ttl: Duration::from_secs(120),
        }
    }
}

impl SessionConfig {
    /// Tokens available to history.
    pub fn history_budget(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_margin)
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_reserved_margin(mut self, tokens: usize) -> Self {
        self.reserved_margin = tokens;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Bounded conversational memory for one (user, channel) pair.
pub struct Session {
    key: SessionKey,
    kind: SessionKind,
    config: SessionConfig,
    counter: Arc<dyn TokenCounter>,
    history: VecDeque<(usize, ChatMessage)>,
    total_tokens: usize,
    last_access: Instant,
    functions: Vec<FunctionDefinition>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("config", &self.config)
            .field("history", &format!("{} messages", self.history.len()))
            .field("total_tokens", &self.total_tokens)
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl Session {
    /// Create an empty session using the default token counter.
    pub fn new(kind: SessionKind, key: SessionKey, config: SessionConfig) -> Self {
        Self::with_counter(kind, key, config, Arc::new(ApproximateTokenCounter::default()))
    }

    pub fn with_counter(
        kind: SessionKind,
        key: SessionKey,
        config: SessionConfig,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            key,
            kind,
            config,
            counter,
            history: VecDeque::new(),
            total_tokens: 0,
            last_access: Instant::now(),
            functions: Vec::new(),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    /// Append a message and evict the oldest entries until the history fits
    /// the budget. Returns the total token cost after eviction.
    pub fn add_history(&mut self, message: ChatMessage) -> usize {
        let cost = self.counter.count(&message);
        self.history.push_back((cost, message));
        self.total_tokens += cost;

        let budget = self.config.history_budget();
        let mut evicted = 0;
        while self.total_tokens > budget && self.history.len() > 1 {
            if let Some((old_cost, _)) = self.history.pop_front() {
                self.total_tokens -= old_cost;
                evicted += 1;
            }
        }

        if evicted > 0 {
            log::debug!(
                "session {}/{}: evicted {} message(s), {} tokens remain (budget {})",
                self.key.user,
                self.key.channel,
                evicted,
                self.total_tokens,
                budget
            );
        }

        self.last_access = Instant::now();
        self.total_tokens
    }

    /// Messages in append order.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.iter().map(|(_, m)| m.clone()).collect()
    }

    /// Token costs in append order, parallel to [`Session::history`].
    pub fn history_costs(&self) -> Vec<usize> {
        self.history.iter().map(|(cost, _)| *cost).collect()
    }

    /// Request context: the persona as a system message followed by history.
    /// An empty persona is omitted.
    pub fn context(&self, persona: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !persona.is_empty() {
            messages.push(ChatMessage::system(persona));
        }
        messages.extend(self.history.iter().map(|(_, m)| m.clone()));
        messages
    }

    /// Aggregate token cost of the stored history.
    pub fn prompt_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.total_tokens = 0;
    }

    /// Whether the session has been idle longer than its TTL at `now`,
    /// regardless of kind.
    pub fn is_idle_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) > self.config.ttl
    }

    /// Whether this session is stale at `now`. Direct sessions never are.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        match self.kind {
            SessionKind::Direct => false,
            SessionKind::Channel => self.is_idle_at(now),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Enable a set of functions for the next completion turns.
    pub fn use_functions(&mut self, functions: Vec<FunctionDefinition>) {
        self.functions = functions;
    }

    pub fn functions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn clear_functions(&mut self) {
        self.functions.clear();
    }
}

/// Shared handle to a session owned by a [`SessionStore`].
///
/// Holding the lock for the duration of a completion run keeps every stage for
/// one conversation sequential.
pub type SharedSession = Arc<Mutex<Session>>;

/// Owns all sessions, keyed by (user, channel).
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, SharedSession>>,
    config: SessionConfig,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .finish()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_counter(config, Arc::new(ApproximateTokenCounter::default()))
    }

    pub fn with_counter(config: SessionConfig, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            counter,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Return the live session for the key, creating one if absent. A stale
    /// session is dropped and replaced by a fresh one.
    pub async fn get(&self, kind: SessionKind, user: &str, channel: &str) -> SharedSession {
        let key = SessionKey::new(user, channel);
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(&key) {
            if !entry_matches(existing, |s| s.is_expired()) {
                return existing.clone();
            }
            log::debug!("session {}/{} expired, starting fresh", user, channel);
            sessions.remove(&key);
        }

        let session = Arc::new(Mutex::new(Session::with_counter(
            kind,
            key.clone(),
            self.config,
            self.counter.clone(),
        )));
        sessions.insert(key, session.clone());
        session
    }

    /// Whether a non-expired session exists for the key.
    pub async fn has(&self, user: &str, channel: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&SessionKey::new(user, channel))
            .is_some_and(|s| !entry_matches(s, |s| s.is_expired()))
    }

    /// Whether a session for the key was used within its TTL, regardless of
    /// kind. Used to continue a conversation the bot was not addressed in.
    pub async fn has_active(&self, user: &str, channel: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&SessionKey::new(user, channel))
            .is_some_and(|s| !entry_matches(s, |s| s.is_idle_at(Instant::now())))
    }

    /// Remove the session, discarding its history.
    pub async fn clear(&self, user: &str, channel: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&SessionKey::new(user, channel)).is_some()
    }

    /// Drop every expired session. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| !entry_matches(s, |s| s.is_expired()));
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

// A session locked by an in-flight run is in use, so it never matches a
// staleness predicate.
fn entry_matches(session: &SharedSession, predicate: impl Fn(&Session) -> bool) -> bool {
    match session.try_lock() {
        Ok(guard) => predicate(&guard),
        Err(_) => false,
    }
}

/// True when `text` is a conversation reset marker: four or more dashes and
/// nothing else.
pub fn is_reset_command(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() >= 4 && trimmed.chars().all(|c| c == '-')
}
