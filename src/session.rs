//! Inference session registry.
//!
//! The vision service addresses its callbacks by session id. This registry
//! maps those ids back to the owning user. Sessions live in memory only and
//! expire a fixed time after creation.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One inference session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// In-memory session table with a time-to-live.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionInfo>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl.as_secs() as i64),
        }
    }

    /// Open a new session for `user_id`.
    pub fn create(&self, user_id: &str) -> SessionInfo {
        self.create_at(user_id, Utc::now())
    }

    pub fn create_at(&self, user_id: &str, now: DateTime<Utc>) -> SessionInfo {
        self.sweep_at(now);
        let info = SessionInfo {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            status: SessionStatus::Active,
        };
        self.sessions.insert(info.session_id.clone(), info.clone());
        tracing::info!(
            "Session created: session={}, user={}, open={}",
            info.session_id,
            info.user_id,
            self.sessions.len()
        );
        info
    }

    /// Drop completed and expired sessions. Returns how many were dropped.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, info| {
            info.status == SessionStatus::Active && now <= info.created_at + self.ttl
        });
        before.saturating_sub(self.sessions.len())
    }

    /// Owning user of an active session.
    ///
    /// Expired sessions are removed on lookup. Completed or unknown sessions
    /// resolve to `None`.
    pub fn user_for(&self, session_id: &str) -> Option<String> {
        self.user_for_at(session_id, Utc::now())
    }

    pub fn user_for_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<String> {
        let info = self.sessions.get(session_id).map(|entry| entry.clone());
        let Some(info) = info else {
            tracing::warn!("Session not found: session={}", session_id);
            return None;
        };

        if now > info.created_at + self.ttl {
            self.sessions.remove(session_id);
            tracing::warn!("Session expired: session={}", session_id);
            return None;
        }

        match info.status {
            SessionStatus::Active => Some(info.user_id),
            SessionStatus::Completed => None,
        }
    }

    /// Mark a session completed. Returns the session if it existed.
    pub fn finish(&self, session_id: &str) -> Option<SessionInfo> {
        let mut entry = self.sessions.get_mut(session_id)?;
        entry.status = SessionStatus::Completed;
        tracing::info!("Session finished: session={}", session_id);
        Some(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
