//! In-process table of live session snapshots.
//!
//! The session manager publishes a snapshot after every state change. Readers
//! poll snapshots and never touch the live session. Terminal sessions expire
//! after a TTL; running ones are kept regardless of age.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::DebateSession;

#[derive(Debug, Clone)]
struct Entry {
    snapshot: DebateSession,
    updated_at: DateTime<Utc>,
}

/// Thread-safe `session id -> snapshot` map.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Entry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Stores a copy of `session`, replacing any earlier snapshot.
    pub fn publish(&self, session: &DebateSession) {
        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        sessions.insert(
            session.id.clone(),
            Entry {
                snapshot: session.clone(),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, session_id: &str) -> Option<DebateSession> {
        let sessions = self.sessions.read().unwrap_or_else(|p| p.into_inner());
        sessions.get(session_id).map(|e| e.snapshot.clone())
    }

    /// Snapshots of every non-terminal session, oldest first.
    pub fn list_active(&self) -> Vec<DebateSession> {
        let sessions = self.sessions.read().unwrap_or_else(|p| p.into_inner());
        let mut active: Vec<DebateSession> = sessions
            .values()
            .filter(|e| !e.snapshot.status.is_terminal())
            .map(|e| e.snapshot.clone())
            .collect();
        active.sort_by_key(|s| s.created_at);
        active
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops terminal sessions that finished more than `ttl` ago.
    ///
    /// Returns how many were removed.
    pub fn cleanup_expired(&self, ttl: Duration) -> usize {
        self.cleanup_expired_at(ttl, Utc::now())
    }

    fn cleanup_expired_at(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
        else {
            return 0;
        };

        let mut sessions = self.sessions.write().unwrap_or_else(|p| p.into_inner());
        let before = sessions.len();
        sessions.retain(|_, entry| {
            if !entry.snapshot.status.is_terminal() {
                return true;
            }
            let finished = entry.snapshot.completed_at.unwrap_or(entry.updated_at);
            finished > cutoff
        });

        let removed = before - sessions.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = sessions.len(), "Expired session snapshots");
        }
        removed
    }
}
