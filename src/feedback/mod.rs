//! Voice feedback selection for the squat coach.
//!
//! This module contains:
//! - The fixed phrase sets and the delivery length limit
//! - Per-user delivery history (last text, per-text send times)
//! - The selection gate shared by every voice producer

pub mod history;
pub mod phrases;
pub mod selection;

// Re-export commonly used types
pub use history::{FeedbackRecord, FeedbackTracker};
pub use phrases::{truncate_feedback, PhrasePool, MAX_FEEDBACK_CHARS};
pub use selection::{ai_candidates, segment_corrections, Decision, FeedbackGate};
