//! Posture metrics and squat stage classification.
//!
//! Averaged insole ratios are combined into front/rear/inner/outer/heel
//! pressure and checked against the descent and ascent bands. The stage
//! with fewer violated bands wins; ties go to descent.

use crate::feedback::phrases::{self, PhrasePool};
use crate::sensor::PressureSample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Squat phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Descent,
    Ascent,
    Unknown,
}

/// Outcome of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedbackStatus {
    Good,
    Bad,
    NoData,
}

/// Zone sums for one foot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FootMetrics {
    front: f64,
    rear: f64,
    inner: f64,
    outer: f64,
    heel: f64,
}

impl FootMetrics {
    fn from_sample(sample: &PressureSample) -> Self {
        let z = |zone| sample.zone(zone);
        Self {
            front: z(3) + z(4) + z(6),
            rear: z(1) + z(5),
            outer: z(1) + z(2) + z(3) + z(4),
            inner: z(5) + z(6),
            heel: z(1) + z(5),
        }
    }

    fn total(&self) -> f64 {
        self.front + self.rear
    }
}

/// Metrics averaged across both feet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedMetrics {
    pub front: f64,
    pub rear: f64,
    pub inner: f64,
    pub outer: f64,
    pub heel: f64,
    pub inner_outer_diff: f64,
    pub left_right_diff: f64,
}

impl CombinedMetrics {
    /// Combine the averaged samples of both feet.
    ///
    /// A missing foot contributes zeros to the averages.
    pub fn from_averages(left: Option<&PressureSample>, right: Option<&PressureSample>) -> Self {
        let left = left.map(FootMetrics::from_sample).unwrap_or_default();
        let right = right.map(FootMetrics::from_sample).unwrap_or_default();

        let inner = (left.inner + right.inner) / 2.0;
        let outer = (left.outer + right.outer) / 2.0;
        Self {
            front: (left.front + right.front) / 2.0,
            rear: (left.rear + right.rear) / 2.0,
            inner,
            outer,
            heel: (left.heel + right.heel) / 2.0,
            inner_outer_diff: (inner - outer).abs(),
            left_right_diff: (left.total() - right.total()).abs(),
        }
    }
}

const MAX_INNER_OUTER_DIFF: f64 = 10.0;
const MAX_LEFT_RIGHT_DIFF: f64 = 15.0;

fn between(value: f64, min: f64, max: f64) -> bool {
    value >= min && value <= max
}

/// Result of checking one stage's bands.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvaluation {
    pub stage: Stage,
    /// One corrective phrase per violated band, in check order
    pub violations: Vec<&'static str>,
    /// Phrase used when nothing is violated
    pub stable_message: &'static str,
}

impl StageEvaluation {
    fn new(stage: Stage, stable_message: &'static str) -> Self {
        Self {
            stage,
            violations: Vec::new(),
            stable_message,
        }
    }

    fn check(&mut self, ok: bool, correction: &'static str) {
        if !ok {
            self.violations.push(correction);
        }
    }

    pub fn is_stable(&self) -> bool {
        self.violations.is_empty()
    }

    /// The single message surfaced for this stage.
    pub fn message(&self) -> &'static str {
        self.violations.first().copied().unwrap_or(self.stable_message)
    }
}

/// Check the descent bands: rear 55-70, front at most 35, heel at least 55.
pub fn evaluate_descent(m: &CombinedMetrics) -> StageEvaluation {
    let mut eval = StageEvaluation::new(Stage::Descent, phrases::DESCENT_STABLE);
    eval.check(m.front <= 35.0, phrases::SHIFT_TO_HEELS);
    eval.check(m.heel >= 55.0, phrases::SINK_INTO_HEELS);
    eval.check(between(m.rear, 55.0, 70.0), phrases::SIT_BACK);
    eval.check(m.inner_outer_diff <= MAX_INNER_OUTER_DIFF, phrases::BALANCE_INNER_OUTER);
    eval.check(m.left_right_diff <= MAX_LEFT_RIGHT_DIFF, phrases::EVEN_FEET);
    eval
}

/// Check the ascent bands: rear 45-55, front 45-55, heel at least 45.
pub fn evaluate_ascent(m: &CombinedMetrics) -> StageEvaluation {
    let mut eval = StageEvaluation::new(Stage::Ascent, phrases::ASCENT_STABLE);
    eval.check(m.heel >= 45.0, phrases::HEELS_DOWN);
    eval.check(between(m.rear, 45.0, 55.0), phrases::DRIVE_MIDFOOT);
    eval.check(between(m.front, 45.0, 55.0), phrases::CHEST_UP);
    eval.check(m.inner_outer_diff <= MAX_INNER_OUTER_DIFF, phrases::BALANCE_INNER_OUTER);
    eval.check(m.left_right_diff <= MAX_LEFT_RIGHT_DIFF, phrases::EVEN_FEET);
    eval
}

/// Pick the stage with fewer violations, preferring descent on a tie.
pub fn choose_stage(descent: StageEvaluation, ascent: StageEvaluation) -> StageEvaluation {
    if ascent.violations.len() < descent.violations.len() {
        ascent
    } else {
        descent
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub stage: Stage,
    pub status: FeedbackStatus,
    /// Message text, cut to the configured character limit
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CombinedMetrics>,
}

/// Classify already-combined metrics, cutting the message to `max_chars`.
pub fn classify_metrics(metrics: CombinedMetrics, max_chars: usize) -> FeedbackResult {
    let winner = choose_stage(evaluate_descent(&metrics), evaluate_ascent(&metrics));
    FeedbackResult {
        stage: winner.stage,
        status: if winner.is_stable() {
            FeedbackStatus::Good
        } else {
            FeedbackStatus::Bad
        },
        feedback: phrases::truncate_feedback(winner.message(), max_chars),
        metrics: Some(metrics),
    }
}

/// Classify the averaged samples of both feet.
///
/// With no data on either foot the result is `NO_DATA` carrying a random
/// encouragement phrase from `pool`.
pub fn classify<R: Rng + ?Sized>(
    left: Option<&PressureSample>,
    right: Option<&PressureSample>,
    pool: &PhrasePool,
    rng: &mut R,
    max_chars: usize,
) -> FeedbackResult {
    if left.is_none() && right.is_none() {
        let phrase = pool.pick(rng).unwrap_or_default();
        return FeedbackResult {
            stage: Stage::Unknown,
            status: FeedbackStatus::NoData,
            feedback: phrases::truncate_feedback(phrase, max_chars),
            metrics: None,
        };
    }

    classify_metrics(CombinedMetrics::from_averages(left, right), max_chars)
}
