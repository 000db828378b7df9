//! Fixed coaching phrases and the delivery length limit.

use crate::ai_state::Segment;
use rand::seq::SliceRandom;
use rand::Rng;

/// Maximum number of characters in any delivered message.
pub const MAX_FEEDBACK_CHARS: usize = 25;

/// Generic encouragement used when there is nothing to correct.
pub const ENCOURAGEMENT: &[&str] = &[
    "Keep going, you got this",
    "Breathe and stay steady",
    "Nice pace, keep moving",
    "Focus on smooth reps",
];

/// Phrases used when every tracked segment reports good.
pub const ALL_GOOD: &[&str] = &[
    "Great form, keep it up",
    "Posture looks solid",
    "Nice and steady",
];

/// Posture summary when every reported segment is good.
pub const POSTURE_STEADY: &str = "Alignment is steady, hold this posture";
/// Combined view fallback when neither source has anything to report.
pub const NO_RECENT_DATA: &str = "No recent data to give feedback on";

pub const DESCENT_STABLE: &str = "Descent looks stable";
pub const ASCENT_STABLE: &str = "Ascent looks stable";

pub const SHIFT_TO_HEELS: &str = "Shift weight to heels";
pub const SINK_INTO_HEELS: &str = "Sink into your heels";
pub const SIT_BACK: &str = "Sit back over your heels";
pub const HEELS_DOWN: &str = "Keep heels on the floor";
pub const DRIVE_MIDFOOT: &str = "Drive up through mid-foot";
pub const CHEST_UP: &str = "Keep your chest upright";
pub const BALANCE_INNER_OUTER: &str = "Balance inner and outer";
pub const EVEN_FEET: &str = "Even out both feet";

/// Corrective phrase for a segment reported as bad.
pub fn segment_correction(segment: Segment) -> &'static str {
    match segment {
        Segment::Lumbar => "Keep your back straight",
        Segment::Knee => "Keep knees over your toes",
        Segment::Ankle => "Keep your ankles steady",
    }
}

/// Cut `text` to at most `max_chars` characters.
///
/// This is a hard cut: no ellipsis, no word boundaries.
pub fn truncate_feedback(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Pool of phrases picked at random.
#[derive(Debug, Clone)]
pub struct PhrasePool {
    phrases: Vec<String>,
}

impl PhrasePool {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases.into_iter().map(Into::into).collect(),
        }
    }

    /// Default encouragement pool.
    pub fn encouragement() -> Self {
        Self::new(ENCOURAGEMENT.iter().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Pick any phrase.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.phrases.choose(rng).map(String::as_str)
    }

    /// Pick a phrase different from `avoid`, retrying at most once per
    /// phrase in the pool. `None` when every draw collided.
    pub fn pick_excluding<R: Rng + ?Sized>(&self, rng: &mut R, avoid: Option<&str>) -> Option<&str> {
        for _ in 0..self.phrases.len() {
            let candidate = self.pick(rng)?;
            if Some(candidate) != avoid {
                return Some(candidate);
            }
        }
        None
    }
}

impl Default for PhrasePool {
    fn default() -> Self {
        Self::encouragement()
    }
}
