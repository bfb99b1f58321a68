//! # Session Store
//!
//! Keyed registry of streaming sessions. Each session carries the engine context between
//! chunks and counts the chunks it has processed.
//!
//! ## Locking:
//! - The map itself sits behind a `std::sync::RwLock` held only for lookups and inserts,
//!   never across an await point.
//! - Every session owns a `tokio::sync::Mutex`. A chunk holds it from lookup to commit and a
//!   close holds it while removing the session, so work on one session is serialized while
//!   different sessions never wait on each other.
//!
//! ## Session Lifecycle:
//! 1. **Created**: `create` inserts a fresh id with the initial context and a zero counter
//! 2. **Active**: every successful chunk replaces the context and bumps the counter (`commit`)
//! 3. **Closed**: `delete` marks the session closed and removes it; anyone still waiting on
//!    its lock gets `SessionNotFound`

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::engine::StreamingContext;

/// The requested session does not exist or has been closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotFound(pub String);

impl fmt::Display for SessionNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session not found: {}", self.0)
    }
}

impl std::error::Error for SessionNotFound {}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub style_index: usize,
    pub chunk_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Mutable part of a session, only reachable through its lock.
#[derive(Debug)]
struct SessionState {
    context: StreamingContext,
    closed: bool,
}

#[derive(Debug)]
struct SessionEntry {
    session_id: String,
    style_index: usize,
    created_at: DateTime<Utc>,
    /// Written only while `state` is locked; readable without it for snapshots.
    chunk_count: AtomicU64,
    state: Arc<Mutex<SessionState>>,
}

impl SessionEntry {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            style_index: self.style_index,
            chunk_count: self.chunk_count.load(Ordering::Acquire),
            created_at: self.created_at,
        }
    }
}

/// Exclusive access to one session, from lookup to commit.
///
/// Dropping the guard without calling [`SessionGuard::commit`] leaves the session unchanged.
pub struct SessionGuard {
    entry: Arc<SessionEntry>,
    state: OwnedMutexGuard<SessionState>,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.entry.session_id
    }

    pub fn style_index(&self) -> usize {
        self.entry.style_index
    }

    pub fn chunk_count(&self) -> u64 {
        self.entry.chunk_count.load(Ordering::Acquire)
    }

    /// The context to hand to the engine for the next chunk.
    pub fn context(&self) -> &StreamingContext {
        &self.state.context
    }

    /// Replace the context and advance the counter; returns the new chunk index.
    ///
    /// Both writes happen synchronously under the lock, so a cancelled request either
    /// committed fully or not at all.
    pub fn commit(mut self, context: StreamingContext) -> u64 {
        self.state.context = context;
        let index = self.entry.chunk_count.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(session_id = %self.entry.session_id, chunk_index = index, "Session advanced");
        index
    }
}

/// Registry of active streaming sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id.
    pub fn create(&self, style_index: usize) -> String {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);

        let session_id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let entry = SessionEntry {
            session_id: session_id.clone(),
            style_index,
            created_at: Utc::now(),
            chunk_count: AtomicU64::new(0),
            state: Arc::new(Mutex::new(SessionState {
                context: StreamingContext::initial(style_index),
                closed: false,
            })),
        };
        sessions.insert(session_id.clone(), Arc::new(entry));

        debug!(%session_id, style_index, active = sessions.len(), "Session created");
        session_id
    }

    fn entry(&self, session_id: &str) -> Result<Arc<SessionEntry>, SessionNotFound> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionNotFound(session_id.to_string()))
    }

    pub fn get(&self, session_id: &str) -> Result<SessionSnapshot, SessionNotFound> {
        Ok(self.entry(session_id)?.snapshot())
    }

    /// Enter the session's critical section.
    ///
    /// Waits for any chunk or close already in progress on the same session. A session closed
    /// while waiting yields `SessionNotFound`.
    pub async fn lock(&self, session_id: &str) -> Result<SessionGuard, SessionNotFound> {
        let entry = self.entry(session_id)?;
        let state = Arc::clone(&entry.state).lock_owned().await;

        if state.closed {
            return Err(SessionNotFound(session_id.to_string()));
        }

        Ok(SessionGuard { entry, state })
    }

    /// Replace a session's context outside of a chunk; returns the new chunk index.
    pub async fn update(
        &self,
        session_id: &str,
        context: StreamingContext,
    ) -> Result<u64, SessionNotFound> {
        Ok(self.lock(session_id).await?.commit(context))
    }

    /// Close and remove a session. Returns `false` if it did not exist.
    ///
    /// Takes the session lock first, so a close issued during a chunk completes after it.
    pub async fn delete(&self, session_id: &str) -> bool {
        let entry = match self.entry(session_id) {
            Ok(entry) => entry,
            Err(_) => return false,
        };

        let mut state = Arc::clone(&entry.state).lock_owned().await;
        if state.closed {
            return false;
        }
        state.closed = true;

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, &entry))
        {
            sessions.remove(session_id);
        }

        debug!(%session_id, active = sessions.len(), "Session closed");
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every session (shutdown).
    pub fn clear(&self) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
