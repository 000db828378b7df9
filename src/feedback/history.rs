//! Per-user record of delivered voice feedback.
//!
//! Two things are tracked for each user: the last text delivered (for
//! anti-repeat) and the last send time of every distinct text (for the
//! cooldown). Each user's record sits behind its own lock, which is the
//! serialization point for message selection.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Delivery bookkeeping for one user.
#[derive(Debug, Clone, Default)]
pub struct FeedbackRecord {
    /// Last text delivered
    pub last_text: Option<String>,
    /// Last send time per distinct text
    pub sent_at: HashMap<String, DateTime<Utc>>,
}

impl FeedbackRecord {
    /// Whether `text` was sent less than `window` before `now`.
    pub fn is_under_cooldown(&self, text: &str, window: Duration, now: DateTime<Utc>) -> bool {
        self.sent_at
            .get(text)
            .is_some_and(|sent| now - *sent < window)
    }

    /// Drop send times that no longer hold anything under cooldown.
    pub fn expire(&mut self, window: Duration, now: DateTime<Utc>) {
        self.sent_at.retain(|_, sent| now - *sent < window);
    }

    pub fn mark_sent(&mut self, text: &str, now: DateTime<Utc>) {
        self.sent_at.insert(text.to_string(), now);
        self.last_text = Some(text.to_string());
    }
}

/// Concurrent per-user feedback records.
#[derive(Debug, Default)]
pub struct FeedbackTracker {
    users: DashMap<String, Arc<Mutex<FeedbackRecord>>>,
}

impl FeedbackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, user_id: &str) -> Arc<Mutex<FeedbackRecord>> {
        if let Some(record) = self.users.get(user_id) {
            return record.clone();
        }
        self.users
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Run `f` with exclusive access to the user's record.
    ///
    /// Only this user's record is locked while `f` runs.
    pub fn with_record<T>(&self, user_id: &str, f: impl FnOnce(&mut FeedbackRecord) -> T) -> T {
        let record = self.record(user_id);
        let mut guard = record.lock();
        f(&mut guard)
    }

    /// Forget users outside `active` with nothing left under cooldown.
    ///
    /// A record locked by a selection in progress is kept. Returns the
    /// number of users dropped.
    pub fn sweep_idle(&self, active: &[String], window: Duration, now: DateTime<Utc>) -> usize {
        let before = self.users.len();
        self.users.retain(|user_id, record| {
            if active.iter().any(|u| u == user_id) {
                return true;
            }
            match record.try_lock() {
                Some(mut record) => {
                    record.expire(window, now);
                    !record.sent_at.is_empty()
                }
                None => true,
            }
        });
        let dropped = before.saturating_sub(self.users.len());
        if dropped > 0 {
            tracing::debug!("Dropped feedback history for {} idle users", dropped);
        }
        dropped
    }

}
