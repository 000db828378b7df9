//! Voice message selection with anti-repeat and cooldown gating.
//!
//! A message is delivered only if it passes two independent gates: it must
//! differ from the last text sent to the user, and the same text must not
//! have been sent within the cooldown window. When either gate fails the
//! tick is silent. Silence is a normal outcome, not an error.

use crate::ai_state::{Segment, SegmentMap, SegmentStatus};
use crate::feedback::history::{FeedbackRecord, FeedbackTracker};
use crate::feedback::phrases::{self, PhrasePool};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Outcome of one selection pass for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Deliver this text; it has already been recorded as sent
    Send(String),
    /// Every candidate equals the last text sent
    Repeat,
    /// The chosen text was sent within the cooldown window
    Cooldown(String),
    /// Nothing to say
    NoCandidate,
}

impl Decision {
    pub fn text(&self) -> Option<&str> {
        match self {
            Decision::Send(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self, Decision::Send(_))
    }
}

/// Corrections for bad segments, highest priority first.
pub fn segment_corrections(segments: &SegmentMap) -> Vec<&'static str> {
    Segment::PRIORITY
        .iter()
        .filter(|segment| segments.get(*segment) == Some(&SegmentStatus::Bad))
        .map(|segment| phrases::segment_correction(*segment))
        .collect()
}

/// Ordered candidates derived from AI segment statuses.
///
/// One correction per bad segment in priority order; if no segment is bad
/// the whole all-good set is returned.
pub fn ai_candidates(segments: &SegmentMap) -> Vec<&'static str> {
    let corrections = segment_corrections(segments);
    if corrections.is_empty() {
        phrases::ALL_GOOD.to_vec()
    } else {
        corrections
    }
}

/// Gate shared by every producer of voice messages.
#[derive(Debug)]
pub struct FeedbackGate {
    tracker: FeedbackTracker,
    cooldown: Duration,
    max_chars: usize,
    encouragement: PhrasePool,
    rng: Mutex<StdRng>,
}

impl FeedbackGate {
    pub fn new(cooldown: std::time::Duration, max_chars: usize) -> Self {
        Self::with_rng(cooldown, max_chars, StdRng::from_entropy())
    }

    /// Build a gate with a caller-supplied RNG, e.g. a seeded one.
    pub fn with_rng(cooldown: std::time::Duration, max_chars: usize, rng: StdRng) -> Self {
        Self {
            tracker: FeedbackTracker::new(),
            cooldown: Duration::milliseconds(cooldown.as_millis() as i64),
            max_chars,
            encouragement: PhrasePool::encouragement(),
            rng: Mutex::new(rng),
        }
    }

    /// Replace the encouragement pool.
    pub fn with_encouragement(mut self, pool: PhrasePool) -> Self {
        self.encouragement = pool;
        self
    }

    /// Drop the history of disconnected users once nothing of theirs is
    /// under cooldown. Returns the number of users dropped.
    pub fn forget_idle(&self, active: &[String], now: DateTime<Utc>) -> usize {
        self.tracker.sweep_idle(active, self.cooldown, now)
    }

    /// Select from AI state: encouragement when there is none, otherwise
    /// segment corrections.
    pub fn select(&self, user_id: &str, segments: &SegmentMap, now: DateTime<Utc>) -> Decision {
        if segments.is_empty() {
            self.select_encouragement(user_id, now)
        } else {
            self.select_from(user_id, &ai_candidates(segments), now)
        }
    }

    /// Draw a random encouragement phrase that differs from the last text.
    ///
    /// The draw is retried at most once per phrase in the pool.
    pub fn select_encouragement(&self, user_id: &str, now: DateTime<Utc>) -> Decision {
        self.tracker.with_record(user_id, |record| {
            if self.encouragement.is_empty() {
                return Decision::NoCandidate;
            }
            let last = record.last_text.clone();
            let picked = {
                let mut rng = self.rng.lock();
                self.encouragement
                    .pick_excluding(&mut *rng, last.as_deref())
                    .map(str::to_string)
            };
            match picked {
                Some(text) => self.finish(user_id, record, &text, now),
                None => Decision::Repeat,
            }
        })
    }

    /// Take the first candidate that differs from the last text sent.
    pub fn select_from<S: AsRef<str>>(
        &self,
        user_id: &str,
        candidates: &[S],
        now: DateTime<Utc>,
    ) -> Decision {
        if candidates.is_empty() {
            return Decision::NoCandidate;
        }
        self.tracker.with_record(user_id, |record| {
            let last = record.last_text.as_deref();
            let chosen = candidates
                .iter()
                .map(|c| phrases::truncate_feedback(c.as_ref(), self.max_chars))
                .find(|c| Some(c.as_str()) != last);
            match chosen {
                Some(text) => self.finish(user_id, record, &text, now),
                None => Decision::Repeat,
            }
        })
    }

    /// Truncate, apply the cooldown and record the send.
    fn finish(
        &self,
        user_id: &str,
        record: &mut FeedbackRecord,
        text: &str,
        now: DateTime<Utc>,
    ) -> Decision {
        let text = phrases::truncate_feedback(text, self.max_chars);
        record.expire(self.cooldown, now);
        if record.is_under_cooldown(&text, self.cooldown, now) {
            tracing::debug!("Feedback under cooldown: user={}, text={:?}", user_id, text);
            return Decision::Cooldown(text);
        }
        record.mark_sent(&text, now);
        Decision::Send(text)
    }
}
