//! Feedback fusion.
//!
//! The engine owns the two periodic jobs that feed every connected user:
//!
//! ```text
//!   telemetry tick (1 s)  ──→ DATA envelope (value, ts, ai?)   ──┐
//!                                                                ├──→ Transport
//!   feedback tick (10 s)  ──→ AI state | insole classifier       │
//!                             | encouragement ──→ FeedbackGate ──┘
//! ```
//!
//! Telemetry is never gated. Voice messages always go through the shared
//! [`FeedbackGate`], which is also used by the inference relay. Insole
//! snapshots are broadcast on every ingest.

use crate::ai_state::{AiStateStore, SegmentMap, SegmentStatus};
use crate::config::Config;
use crate::core::{classify, FeedbackResult, FeedbackStatus, SensorStore};
use crate::feedback::{phrases, segment_corrections, Decision, FeedbackGate, PhrasePool};
use crate::push::{AnalysisFields, Envelope, TelemetryPayload, Transport};
use crate::stats::{PipelineStats, SharedStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;

/// Overall verdict of the reported body segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureStatus {
    Bad,
    Good,
    NoData,
}

/// Posture half of the combined view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostureFeedback {
    pub status: PostureStatus,
    pub raw: SegmentMap,
    /// Corrections in priority order, or a single steady note
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PostureFeedback {
    pub fn empty() -> Self {
        Self {
            status: PostureStatus::NoData,
            raw: SegmentMap::new(),
            messages: Vec::new(),
            updated_at: None,
        }
    }

    pub fn from_segments(segments: SegmentMap, updated_at: Option<DateTime<Utc>>) -> Self {
        let corrections = segment_corrections(&segments);
        let (status, messages) = if !corrections.is_empty() {
            (PostureStatus::Bad, corrections)
        } else if segments.values().any(|s| *s == SegmentStatus::Good) {
            (PostureStatus::Good, vec![phrases::POSTURE_STEADY])
        } else {
            (PostureStatus::NoData, Vec::new())
        };
        Self {
            status,
            raw: segments,
            messages: messages.into_iter().map(str::to_string).collect(),
            updated_at,
        }
    }
}

/// Posture and insole feedback side by side, plus a merged message list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedFeedback {
    pub ai: PostureFeedback,
    pub fsr: FeedbackResult,
    /// Never empty
    pub overall_messages: Vec<String>,
}

impl CombinedFeedback {
    pub fn new(ai: PostureFeedback, fsr: FeedbackResult) -> Self {
        let mut overall_messages = ai.messages.clone();
        if fsr.status != FeedbackStatus::NoData {
            overall_messages.push(fsr.feedback.clone());
        }
        if overall_messages.is_empty() {
            overall_messages.push(phrases::NO_RECENT_DATA.to_string());
        }
        Self {
            ai,
            fsr,
            overall_messages,
        }
    }
}

/// Fusion engine shared by the scheduler, the relay and the HTTP layer.
pub struct FeedbackEngine {
    sensors: Arc<SensorStore>,
    ai: Arc<AiStateStore>,
    gate: FeedbackGate,
    transport: Arc<dyn Transport>,
    stats: SharedStats,
    encouragement: PhrasePool,
    max_chars: usize,
    rng: Mutex<StdRng>,
}

impl FeedbackEngine {
    pub fn new(
        config: &Config,
        sensors: Arc<SensorStore>,
        ai: Arc<AiStateStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            sensors,
            ai,
            gate: FeedbackGate::new(config.feedback_cooldown, config.max_feedback_chars),
            transport,
            stats: Arc::new(PipelineStats::new()),
            encouragement: PhrasePool::encouragement(),
            max_chars: config.max_feedback_chars,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the voice gate, e.g. with a seeded one.
    pub fn with_gate(mut self, gate: FeedbackGate) -> Self {
        self.gate = gate;
        self
    }

    /// Seed the RNG used for telemetry values and no-data phrases.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn sensors(&self) -> &Arc<SensorStore> {
        &self.sensors
    }

    pub fn ai_state(&self) -> &Arc<AiStateStore> {
        &self.ai
    }

    pub fn gate(&self) -> &FeedbackGate {
        &self.gate
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Classify the insole window ending now.
    pub fn classify_window(&self) -> FeedbackResult {
        self.classify_window_at(Utc::now())
    }

    pub fn classify_window_at(&self, now: DateTime<Utc>) -> FeedbackResult {
        let averages = self
            .sensors
            .windowed_average_at(self.sensors.window_duration(), now);
        let mut rng = self.rng.lock();
        classify(
            averages.left.as_ref(),
            averages.right.as_ref(),
            &self.encouragement,
            &mut *rng,
            self.max_chars,
        )
    }

    /// Posture state for `user_id` (if any) next to the insole classifier.
    pub fn combined_feedback(&self, user_id: Option<&str>) -> CombinedFeedback {
        self.combined_feedback_at(user_id, Utc::now())
    }

    pub fn combined_feedback_at(&self, user_id: Option<&str>, now: DateTime<Utc>) -> CombinedFeedback {
        let ai = user_id
            .and_then(|user| self.ai.state(user))
            .map(|state| PostureFeedback::from_segments(state.segments, Some(state.updated_at)))
            .unwrap_or_else(PostureFeedback::empty);
        CombinedFeedback::new(ai, self.classify_window_at(now))
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.transport.is_active(user_id)
    }

    /// Push the latest two-foot snapshot, missing sides zero-filled, to
    /// every active user. Returns the number of successful deliveries.
    pub fn broadcast_insoles(&self) -> usize {
        let users = self.transport.active_users();
        if users.is_empty() {
            return 0;
        }
        let snapshot = self.sensors.latest_snapshot(true);
        users
            .iter()
            .filter(|user_id| {
                self.deliver(
                    user_id,
                    Envelope::Insoles {
                        payload: snapshot.clone(),
                    },
                )
            })
            .count()
    }

    /// Push one telemetry envelope to every active user.
    ///
    /// Returns the number of successful deliveries.
    pub fn telemetry_tick(&self) -> usize {
        self.telemetry_tick_at(Utc::now())
    }

    pub fn telemetry_tick_at(&self, now: DateTime<Utc>) -> usize {
        let mut delivered = 0;
        for user_id in self.transport.active_users() {
            let value: f64 = self.rng.lock().gen();
            let ai = self.ai.snapshot(&user_id);
            let envelope = Envelope::Data {
                payload: TelemetryPayload {
                    value,
                    ts: now.timestamp_millis(),
                    ai: (!ai.is_empty()).then_some(ai),
                    analysis: AnalysisFields::default(),
                },
            };
            if self.deliver(&user_id, envelope) {
                self.stats.record_telemetry_sent();
                delivered += 1;
            }
        }
        delivered
    }

    /// Run voice selection for every active user.
    ///
    /// AI state takes precedence; without it the insole classifier result
    /// is the candidate, and without insole data the user gets
    /// encouragement. Returns the number of voice messages delivered.
    pub fn feedback_tick(&self) -> usize {
        self.feedback_tick_at(Utc::now())
    }

    pub fn feedback_tick_at(&self, now: DateTime<Utc>) -> usize {
        let users = self.transport.active_users();
        self.gate.forget_idle(&users, now);
        if users.is_empty() {
            return 0;
        }

        // Insole data is not per user: classify once per tick
        let insoles = self.classify_window_at(now);

        let mut delivered = 0;
        for user_id in users {
            let segments = self.ai.snapshot(&user_id);
            let decision = if !segments.is_empty() {
                self.gate.select(&user_id, &segments, now)
            } else if insoles.status != FeedbackStatus::NoData {
                self.gate
                    .select_from(&user_id, &[insoles.feedback.as_str()], now)
            } else {
                self.gate.select_encouragement(&user_id, now)
            };
            if self.push_decision(&user_id, decision, now.timestamp_millis()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver a gate decision as a voice envelope stamped `timestamp`
    /// (epoch milliseconds).
    ///
    /// Returns whether a message was delivered.
    pub fn push_decision(&self, user_id: &str, decision: Decision, timestamp: i64) -> bool {
        match decision {
            Decision::Send(text) => {
                tracing::info!("Voice feedback: user={}, text={:?}", user_id, text);
                let delivered = self.deliver(user_id, Envelope::voice(text, Some(timestamp)));
                if delivered {
                    self.stats.record_voice_sent();
                }
                delivered
            }
            Decision::Repeat | Decision::Cooldown(_) => {
                tracing::debug!("Voice suppressed: user={}, decision={:?}", user_id, decision);
                self.stats.record_voice_suppressed();
                false
            }
            Decision::NoCandidate => false,
        }
    }

    /// Best-effort push to one user. Failures are logged, never retried.
    pub fn deliver(&self, user_id: &str, envelope: Envelope) -> bool {
        match self.transport.deliver(user_id, envelope) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Push skipped: {}", e);
                self.stats.record_delivery_failure();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_state::{Segment, SegmentMap, SegmentStatus};
    use crate::feedback::phrases;
    use crate::push::testing::RecordingTransport;
    use crate::sensor::{PressureSample, Side};
    use chrono::Duration;

    fn engine(transport: Arc<RecordingTransport>) -> FeedbackEngine {
        let config = Config::default();
        FeedbackEngine::new(
            &config,
            Arc::new(SensorStore::default()),
            Arc::new(AiStateStore::new()),
            transport,
        )
        .with_gate(FeedbackGate::with_rng(
            config.feedback_cooldown,
            config.max_feedback_chars,
            StdRng::seed_from_u64(7),
        ))
        .with_seed(7)
    }

    fn ai(entries: &[(Segment, SegmentStatus)]) -> SegmentMap {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_telemetry_includes_ai_only_when_present() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1", "u2"]));
        let engine = engine(transport.clone());
        engine
            .ai_state()
            .update("u1", ai(&[(Segment::Knee, SegmentStatus::Bad)]));

        let now = Utc::now();
        assert_eq!(engine.telemetry_tick_at(now), 2);

        match &transport.envelopes_for("u1")[0] {
            Envelope::Data { payload } => {
                assert_eq!(payload.ts, now.timestamp_millis());
                assert!(payload.ai.is_some());
                assert!((0.0..1.0).contains(&payload.value));
            }
            other => panic!("unexpected envelope {other:?}"),
        }
        match &transport.envelopes_for("u2")[0] {
            Envelope::Data { payload } => assert!(payload.ai.is_none()),
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn test_telemetry_repeats_freely() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1"]));
        let engine = engine(transport.clone());
        let now = Utc::now();
        engine.telemetry_tick_at(now);
        engine.telemetry_tick_at(now);
        assert_eq!(transport.envelopes_for("u1").len(), 2);
    }

    #[test]
    fn test_ai_state_drives_voice() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1"]));
        let engine = engine(transport.clone());
        engine
            .ai_state()
            .update("u1", ai(&[(Segment::Knee, SegmentStatus::Bad)]));

        let t0 = Utc::now();
        assert_eq!(engine.feedback_tick_at(t0), 1);
        // Same bad segment on the next tick stays silent
        assert_eq!(engine.feedback_tick_at(t0 + Duration::seconds(10)), 0);
        assert_eq!(
            transport.voices_for("u1"),
            vec![phrases::segment_correction(Segment::Knee).to_string()]
        );
        assert_eq!(engine.stats().snapshot().voice_suppressed, 1);
    }

    #[test]
    fn test_insole_classifier_used_without_ai() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1"]));
        let engine = engine(transport.clone());
        let now = Utc::now();
        // rear 60, front 30, heel 60, inner = outer on both feet: stable descent
        let ratios = [15.0, 10.0, 12.5, 12.5, 45.0, 5.0];
        engine
            .sensors()
            .ingest(PressureSample::at(Side::Left, ratios, now));
        engine
            .sensors()
            .ingest(PressureSample::at(Side::Right, ratios, now));

        assert_eq!(engine.classify_window_at(now).status, FeedbackStatus::Good);
        engine.feedback_tick_at(now);
        assert_eq!(
            transport.voices_for("u1"),
            vec![phrases::DESCENT_STABLE.to_string()]
        );
    }

    #[test]
    fn test_encouragement_without_any_data() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1"]));
        let engine = engine(transport.clone());
        let now = Utc::now();

        assert_eq!(
            engine.classify_window_at(now).status,
            FeedbackStatus::NoData
        );
        assert_eq!(engine.feedback_tick_at(now), 1);
        let voices = transport.voices_for("u1");
        assert!(phrases::ENCOURAGEMENT.contains(&voices[0].as_str()));
    }

    #[test]
    fn test_delivery_failure_does_not_abort_tick() {
        let transport = Arc::new(RecordingTransport {
            users: vec!["gone".to_string(), "u1".to_string()],
            closed: vec!["gone".to_string()],
            ..Default::default()
        });
        let engine = engine(transport.clone());

        assert_eq!(engine.telemetry_tick_at(Utc::now()), 1);
        assert_eq!(transport.envelopes_for("u1").len(), 1);
        assert_eq!(engine.stats().snapshot().delivery_failures, 1);
    }

    #[test]
    fn test_no_active_users() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(transport);
        assert_eq!(engine.telemetry_tick_at(Utc::now()), 0);
        assert_eq!(engine.feedback_tick_at(Utc::now()), 0);
    }

    #[test]
    fn test_ingest_broadcast_reaches_every_user() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1", "u2"]));
        let engine = engine(transport.clone());
        engine.sensors().ingest(PressureSample::new(
            Side::Left,
            [20.0, 10.0, 15.0, 15.0, 30.0, 10.0],
        ));

        assert_eq!(engine.broadcast_insoles(), 2);
        for user in ["u1", "u2"] {
            match &transport.envelopes_for(user)[0] {
                Envelope::Insoles { payload } => {
                    assert_eq!(payload.left.as_ref().map(|s| s.ratios[0]), Some(20.0));
                    // The silent side is zero-filled
                    assert_eq!(payload.right.as_ref().map(|s| s.ratios), Some([0.0; 6]));
                }
                other => panic!("unexpected envelope {other:?}"),
            }
        }
    }

    #[test]
    fn test_broadcast_through_channel_registry() {
        let registry = Arc::new(crate::push::ChannelRegistry::new());
        let (_tx, mut rx) = registry.register("u1");
        let engine = FeedbackEngine::new(
            &Config::default(),
            Arc::new(SensorStore::default()),
            Arc::new(AiStateStore::new()),
            registry,
        );
        engine.sensors().ingest(PressureSample::new(
            Side::Right,
            [10.0, 10.0, 20.0, 20.0, 30.0, 10.0],
        ));

        assert_eq!(engine.broadcast_insoles(), 1);
        assert!(matches!(rx.try_recv(), Ok(Envelope::Insoles { .. })));
        assert!(engine.is_connected("u1"));
        assert!(!engine.is_connected("u2"));
    }

    #[test]
    fn test_combined_feedback_merges_both_sources() {
        let transport = Arc::new(RecordingTransport::default());
        let engine = engine(transport);
        let now = Utc::now();

        let empty = engine.combined_feedback_at(None, now);
        assert_eq!(empty.ai.status, PostureStatus::NoData);
        assert_eq!(empty.fsr.status, FeedbackStatus::NoData);
        assert_eq!(empty.overall_messages, vec![phrases::NO_RECENT_DATA.to_string()]);

        engine.ai_state().update_at(
            "u1",
            ai(&[
                (Segment::Ankle, SegmentStatus::Bad),
                (Segment::Lumbar, SegmentStatus::Bad),
                (Segment::Knee, SegmentStatus::Good),
            ]),
            now,
        );
        let ratios = [15.0, 10.0, 12.5, 12.5, 45.0, 5.0];
        engine.sensors().ingest(PressureSample::at(Side::Left, ratios, now));
        engine.sensors().ingest(PressureSample::at(Side::Right, ratios, now));

        let combined = engine.combined_feedback_at(Some("u1"), now);
        assert_eq!(combined.ai.status, PostureStatus::Bad);
        assert_eq!(combined.ai.updated_at, Some(now));
        assert_eq!(
            combined.overall_messages,
            vec![
                phrases::segment_correction(Segment::Lumbar).to_string(),
                phrases::segment_correction(Segment::Ankle).to_string(),
                phrases::DESCENT_STABLE.to_string(),
            ]
        );

        let json = serde_json::to_value(&combined).unwrap();
        assert_eq!(json["ai"]["status"], "BAD");
        assert_eq!(json["ai"]["raw"]["knee"], "good");
        assert_eq!(json["fsr"]["stage"], "DESCENT");
        assert!(json["overallMessages"].is_array());
    }

    #[test]
    fn test_all_good_posture_is_steady() {
        let posture = PostureFeedback::from_segments(
            ai(&[(Segment::Knee, SegmentStatus::Good)]),
            None,
        );
        assert_eq!(posture.status, PostureStatus::Good);
        assert_eq!(posture.messages, vec![phrases::POSTURE_STEADY.to_string()]);
    }

    #[test]
    fn test_classifier_uses_configured_char_limit() {
        let config = Config {
            max_feedback_chars: 7,
            ..Config::default()
        };
        let engine = FeedbackEngine::new(
            &config,
            Arc::new(SensorStore::default()),
            Arc::new(AiStateStore::new()),
            Arc::new(RecordingTransport::default()),
        );
        let now = Utc::now();
        let ratios = [15.0, 10.0, 12.5, 12.5, 45.0, 5.0];
        engine.sensors().ingest(PressureSample::at(Side::Left, ratios, now));
        engine.sensors().ingest(PressureSample::at(Side::Right, ratios, now));

        assert_eq!(engine.classify_window_at(now).feedback, "Descent");
    }

    #[test]
    fn test_feedback_tick_forgets_disconnected_users() {
        let transport = Arc::new(RecordingTransport::with_users(&["u1"]));
        let engine = engine(transport);
        let t0 = Utc::now();
        assert!(engine.gate().select_from("gone", &["Bye"], t0).is_send());

        engine.feedback_tick_at(t0 + Duration::seconds(31));
        // The history is gone, so the same text is no longer a repeat
        assert!(engine
            .gate()
            .select_from("gone", &["Bye"], t0 + Duration::seconds(32))
            .is_send());
    }
}
