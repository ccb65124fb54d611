//! Server-side session storage
//!
//! The browser holds only an opaque session id. Everything else lives here:
//! the established identity, login attempts awaiting their callback, and the
//! bookkeeping that keeps concurrent callbacks from racing each other.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use crate::session::identity::AuthenticatedIdentity;
use crate::utils::{generate_session_id, Clock};

/// Upper bound on attempts awaiting a callback in one session (several tabs)
pub const MAX_PENDING_LOGINS: usize = 8;

/// A login attempt between the authorization redirect and its callback
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub attempt_id: Uuid,
    pub state: String,
    pub nonce: Option<String>,
    pub original_uri: String,
    pub created_at: DateTime<Utc>,
}

impl PendingLogin {
    #[must_use]
    pub fn new(state: String, nonce: Option<String>, original_uri: String, created_at: DateTime<Utc>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            state,
            nonce,
            original_uri,
            created_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now >= self.created_at + ttl
    }
}

/// Mutable per-session state; only reachable through [`Session::lock`]
#[derive(Debug, Default)]
pub struct SessionData {
    identity: Option<Arc<AuthenticatedIdentity>>,
    pending: HashMap<String, PendingLogin>,
    in_flight: HashSet<Uuid>,
    invalidated: bool,
}

impl SessionData {
    #[must_use]
    pub fn identity(&self) -> Option<&Arc<AuthenticatedIdentity>> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: AuthenticatedIdentity) {
        self.identity = Some(Arc::new(identity));
    }

    pub fn clear_identity(&mut self) -> Option<Arc<AuthenticatedIdentity>> {
        self.identity.take()
    }

    /// Record a new attempt, evicting the oldest when the session is at capacity
    pub fn add_pending(&mut self, pending: PendingLogin) {
        if self.pending.len() >= MAX_PENDING_LOGINS {
            if let Some(oldest) = self
                .pending
                .values()
                .min_by_key(|p| p.created_at)
                .map(|p| p.state.clone())
            {
                self.pending.remove(&oldest);
            }
        }
        self.pending.insert(pending.state.clone(), pending);
    }

    /// Remove and return the attempt for `state`; a second call for the same state returns `None`
    pub fn take_pending(&mut self, state: &str) -> Option<PendingLogin> {
        self.pending.remove(state)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Mark an attempt as exchanging tokens outside the session lock
    pub fn begin_attempt(&mut self, attempt_id: Uuid) {
        self.in_flight.insert(attempt_id);
    }

    /// Finish an attempt; `true` only if it was still in flight and may commit
    pub fn finish_attempt(&mut self, attempt_id: Uuid) -> bool {
        self.in_flight.remove(&attempt_id) && !self.invalidated
    }

    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn invalidate(&mut self) {
        self.invalidated = true;
        self.identity = None;
        self.pending.clear();
        self.in_flight.clear();
    }
}

/// One browser session
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    data: Mutex<SessionData>,
}

impl Session {
    fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_session_id(),
            created_at,
            data: Mutex::new(SessionData::default()),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Serialize access to this session's state
    pub async fn lock(&self) -> MutexGuard<'_, SessionData> {
        self.data.lock().await
    }
}

/// Storage for sessions keyed by opaque id
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create and register a fresh session
    async fn create(&self) -> Arc<Session>;

    /// Look up a live session
    async fn get(&self, id: &str) -> Option<Arc<Session>>;

    /// Remove a session and mark it invalidated so in-flight logins cannot commit to it
    async fn invalidate(&self, id: &str) -> Option<Arc<Session>>;
}

/// Process-local session store
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new(max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_age,
            clock,
        }
    }

    /// Drop every session older than the configured lifetime
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| now >= s.created_at + self.max_age)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            session.lock().await.invalidate();
        }
        if !expired.is_empty() {
            debug!("Purged {} expired sessions", expired.len());
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self) -> Arc<Session> {
        self.purge_expired().await;
        let session = Arc::new(Session::new(self.clock.now()));
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::clone(&session));
        debug!("Created session");
        session
    }

    async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        if self.clock.now() >= session.created_at + self.max_age {
            self.invalidate(id).await;
            return None;
        }
        Some(session)
    }

    async fn invalidate(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.write().await.remove(id)?;
        session.lock().await.invalidate();
        Some(session)
    }
}
