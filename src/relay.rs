//! Inference relay.
//!
//! The vision service posts one callback per analysed frame, addressed by
//! session id. The relay resolves the owning user, refreshes that user's AI
//! state, forwards the analysis as telemetry and derives a voice message
//! that goes through the same gate as the scheduled feedback.

use crate::ai_state::{segments_from_checks, SegmentMap};
use crate::engine::FeedbackEngine;
use crate::feedback::segment_corrections;
use crate::push::{AnalysisFields, Envelope, TelemetryPayload};
use crate::session::SessionRegistry;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Callback kind carrying only a free-text message.
pub const FEEDBACK_KIND: &str = "feedback";

/// Callback body from the vision service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceCallback {
    /// `analysis` (frame result) or `feedback` (free text)
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub frame_number: Option<i64>,
    pub state: Option<String>,
    pub side: Option<String>,
    pub squat_count: Option<i64>,
    /// Raw checks, e.g. `{"back": "good", "knee": "too forward"}`
    pub checks: Option<HashMap<String, String>>,
    /// Already-normalized statuses, preferred over `checks` when present
    pub ai: Option<HashMap<String, String>>,
    pub score: Option<i64>,
    pub feedback: Option<String>,
    /// Epoch milliseconds
    pub timestamp: Option<i64>,
}

impl InferenceCallback {
    fn is_feedback_only(&self) -> bool {
        self.kind.as_deref() == Some(FEEDBACK_KIND)
    }

    /// Segment statuses carried by the callback.
    pub fn segments(&self) -> SegmentMap {
        self.ai
            .as_ref()
            .or(self.checks.as_ref())
            .map(segments_from_checks)
            .unwrap_or_default()
    }

    fn has_segment_data(&self) -> bool {
        self.ai.is_some() || self.checks.is_some()
    }

    fn analysis_fields(&self) -> AnalysisFields {
        AnalysisFields {
            state: self.state.clone(),
            side: self.side.clone(),
            squat_count: self.squat_count,
            checks: self.checks.as_ref().map(sorted_checks),
            score: self.score,
            frame_number: self.frame_number,
        }
    }
}

/// What the relay did with one callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The session is unknown, expired or finished
    UnknownSession,
    /// Handled; `voice` is the text chosen for delivery, if any
    Handled { user_id: String, voice: Option<String> },
}

impl RelayOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, RelayOutcome::Handled { .. })
    }
}

/// Second producer of voice messages, driven by inference callbacks.
pub struct InferenceRelay {
    engine: Arc<FeedbackEngine>,
    sessions: Arc<SessionRegistry>,
}

impl InferenceRelay {
    pub fn new(engine: Arc<FeedbackEngine>, sessions: Arc<SessionRegistry>) -> Self {
        Self { engine, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Handle a callback addressed by session id.
    pub fn on_session_callback(&self, session_id: &str, callback: InferenceCallback) -> RelayOutcome {
        self.on_session_callback_at(session_id, callback, Utc::now())
    }

    pub fn on_session_callback_at(
        &self,
        session_id: &str,
        callback: InferenceCallback,
        now: DateTime<Utc>,
    ) -> RelayOutcome {
        self.engine.stats().record_callback();
        match self.sessions.user_for_at(session_id, now) {
            Some(user_id) => self.on_callback_at(&user_id, callback, now),
            None => {
                tracing::warn!("Dropping inference callback for session {}", session_id);
                RelayOutcome::UnknownSession
            }
        }
    }

    /// Handle a callback for a known user.
    ///
    /// AI state is always refreshed. Telemetry and voice are only produced
    /// while the user has a push connection, so a correction is never
    /// recorded as sent to nobody.
    pub fn on_callback_at(
        &self,
        user_id: &str,
        callback: InferenceCallback,
        now: DateTime<Utc>,
    ) -> RelayOutcome {
        let ts = callback.timestamp.unwrap_or_else(|| now.timestamp_millis());
        let connected = self.engine.is_connected(user_id);

        let candidates: Vec<String> = if callback.is_feedback_only() {
            callback.feedback.iter().cloned().collect()
        } else {
            let segments = callback.segments();
            if callback.has_segment_data() {
                self.engine.ai_state().update_at(user_id, segments.clone(), now);
            }

            if connected {
                let envelope = Envelope::Data {
                    payload: TelemetryPayload {
                        value: 0.0,
                        ts,
                        ai: (!segments.is_empty()).then(|| segments.clone()),
                        analysis: callback.analysis_fields(),
                    },
                };
                self.engine.deliver(user_id, envelope);
            }

            // An all-good frame yields no correction
            let fixes = segment_corrections(&segments);
            if fixes.is_empty() {
                callback.feedback.iter().cloned().collect()
            } else {
                fixes.into_iter().map(str::to_string).collect()
            }
        };

        if !connected {
            tracing::debug!("No push connection for user {}, voice skipped", user_id);
            return RelayOutcome::Handled {
                user_id: user_id.to_string(),
                voice: None,
            };
        }

        let decision = self.engine.gate().select_from(user_id, &candidates, now);
        let voice = decision.text().map(str::to_string);
        self.engine.push_decision(user_id, decision, ts);

        RelayOutcome::Handled {
            user_id: user_id.to_string(),
            voice,
        }
    }
}

/// Sorted copy of raw checks.
fn sorted_checks(checks: &HashMap<String, String>) -> BTreeMap<String, String> {
    checks.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
