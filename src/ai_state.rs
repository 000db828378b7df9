//! Per-user posture state reported by the vision inference service.
//!
//! The service reports a status for three body segments. Each update
//! replaces the user's whole segment map. Users are partitioned in a
//! concurrent map so distinct users never contend on one lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Tracked body segment, declared in feedback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Lumbar,
    Knee,
    Ankle,
}

impl Segment {
    /// All segments, highest priority first.
    pub const PRIORITY: [Segment; 3] = [Segment::Lumbar, Segment::Knee, Segment::Ankle];

    /// Map a check key from the inference service to a segment.
    ///
    /// The service calls the lumbar segment `back`.
    pub fn from_check_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "lumbar" | "back" => Some(Segment::Lumbar),
            "knee" => Some(Segment::Knee),
            "ankle" => Some(Segment::Ankle),
            _ => None,
        }
    }
}

/// Status of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Good,
    Bad,
    #[serde(rename = "null")]
    Absent,
}

impl SegmentStatus {
    /// Normalize a free-form check value.
    ///
    /// `good`/`ok` are good; anything mentioning `bad`, `too`, `forward`
    /// or `backward` is bad; everything else is absent.
    pub fn normalize(value: &str) -> Self {
        let value = value.trim().to_lowercase();
        if value == "good" || value == "ok" {
            SegmentStatus::Good
        } else if ["bad", "too", "forward", "backward"]
            .iter()
            .any(|needle| value.contains(needle))
        {
            SegmentStatus::Bad
        } else {
            SegmentStatus::Absent
        }
    }

    /// Strict parse used by the direct status endpoint.
    pub fn parse_strict(value: &str) -> Result<Self, InvalidStatus> {
        match value.trim().to_lowercase().as_str() {
            "good" => Ok(SegmentStatus::Good),
            "bad" => Ok(SegmentStatus::Bad),
            "null" | "" => Ok(SegmentStatus::Absent),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// A status value outside {good, bad, null}.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidStatus(pub String);

impl fmt::Display for InvalidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid segment status: {:?}", self.0)
    }
}

impl std::error::Error for InvalidStatus {}

/// Segment statuses ordered by priority.
pub type SegmentMap = BTreeMap<Segment, SegmentStatus>;

/// Build a segment map from raw inference checks.
///
/// Unknown keys are ignored and absent statuses are omitted.
pub fn segments_from_checks(checks: &HashMap<String, String>) -> SegmentMap {
    checks
        .iter()
        .filter_map(|(key, value)| {
            let segment = Segment::from_check_key(key)?;
            match SegmentStatus::normalize(value) {
                SegmentStatus::Absent => None,
                status => Some((segment, status)),
            }
        })
        .collect()
}

/// Latest AI state for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiUserState {
    pub segments: SegmentMap,
    pub updated_at: DateTime<Utc>,
}

/// Concurrent per-user AI state store.
#[derive(Debug, Default)]
pub struct AiStateStore {
    users: DashMap<String, AiUserState>,
}

impl AiStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the user's segment map.
    ///
    /// Absent segments are dropped. A blank user id is rejected without
    /// touching any state; returns whether the update was applied.
    pub fn update(&self, user_id: &str, segments: SegmentMap) -> bool {
        self.update_at(user_id, segments, Utc::now())
    }

    pub fn update_at(&self, user_id: &str, segments: SegmentMap, now: DateTime<Utc>) -> bool {
        if user_id.trim().is_empty() {
            tracing::warn!("Skipping AI state update with empty user id");
            return false;
        }

        let segments: SegmentMap = segments
            .into_iter()
            .filter(|(_, status)| *status != SegmentStatus::Absent)
            .collect();

        tracing::info!("AI state update: user={}, state={:?}", user_id, segments);
        self.users.insert(
            user_id.to_string(),
            AiUserState {
                segments,
                updated_at: now,
            },
        );
        true
    }

    /// Copy of the user's segment map; empty for unknown users.
    pub fn snapshot(&self, user_id: &str) -> SegmentMap {
        self.users
            .get(user_id)
            .map(|state| state.segments.clone())
            .unwrap_or_default()
    }

    /// Copy of the user's full state, including the update time.
    pub fn state(&self, user_id: &str) -> Option<AiUserState> {
        self.users.get(user_id).map(|state| state.clone())
    }

    /// Forget the user. Removing an unknown user is a no-op.
    pub fn remove(&self, user_id: &str) {
        if self.users.remove(user_id).is_some() {
            tracing::debug!("AI state removed: user={}", user_id);
        }
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
