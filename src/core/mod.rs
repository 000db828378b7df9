//! Core functionality for the squat coach.
//!
//! This module contains:
//! - The windowed per-side sensor store
//! - Posture metrics and the descent/ascent stage classifier

pub mod metrics;
pub mod windowing;

// Re-export commonly used types
pub use metrics::{
    choose_stage, classify, classify_metrics, evaluate_ascent, evaluate_descent, CombinedMetrics,
    FeedbackResult, FeedbackStatus, Stage, StageEvaluation,
};
pub use windowing::{PerSide, SensorStore};
