//! Insole sensor input for the squat coach.
//!
//! This module holds the pressure sample model and the conversion from
//! firmware payloads into samples.

pub mod types;

// Re-export commonly used types
pub use types::{IngestError, PressureSample, RawPressureReading, Side, ZONE_COUNT};
