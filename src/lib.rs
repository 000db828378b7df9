//! Squat Coach - real-time squat feedback from insoles and posture inference.
//!
//! Two pressure-sensing insoles stream six-zone readings; a vision service
//! reports the status of three body segments. The coach fuses both into
//! short spoken cues and pushes them, together with telemetry, to each
//! connected user.
//!
//! # Feedback guarantees
//!
//! - **Short**: every spoken message is cut to 25 characters
//! - **No nagging**: a message never repeats the one sent just before it
//! - **Cooldown**: the same text is not resent to a user within 30 seconds
//! - **Silence is valid**: a tick with nothing new to say sends nothing
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Squat Coach                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Sensor    │──▶│  Windowing  │──▶│  Classifier │──┐     │
//! │  │ (insoles)   │   │ (10s/side)  │   │ (stage)     │  │     │
//! │  └─────────────┘   └─────────────┘   └─────────────┘  ▼     │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐    │
//! │  │   Relay     │──▶│  AI State   │──▶│  Engine + Gate  │    │
//! │  │ (callbacks) │   │ (per user)  │   │ (1s / 10s)      │    │
//! │  └─────────────┘   └─────────────┘   └────────┬────────┘    │
//! │                                               ▼             │
//! │                                        ┌─────────────┐      │
//! │                                        │    Push     │      │
//! │                                        │ (per user)  │      │
//! │                                        └─────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use squat_coach::{config::Config, core::SensorStore, sensor::{PressureSample, Side}};
//!
//! let store = SensorStore::new(Config::default().window_duration);
//! store.ingest(PressureSample::new(Side::Left, [20.0, 10.0, 15.0, 15.0, 30.0, 10.0]));
//! let averages = store.windowed_average(chrono::Duration::seconds(10));
//! assert!(averages.left.is_some());
//! ```

pub mod ai_state;
pub mod config;
pub mod core;
pub mod engine;
pub mod feedback;
pub mod push;
pub mod relay;
pub mod scheduler;
pub mod sensor;
pub mod session;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use ai_state::{AiStateStore, Segment, SegmentMap, SegmentStatus};
pub use config::{Config, ConfigError};
pub use crate::core::{classify, CombinedMetrics, FeedbackResult, FeedbackStatus, PerSide, SensorStore, Stage};
pub use engine::{CombinedFeedback, FeedbackEngine, PostureFeedback, PostureStatus};
pub use feedback::{Decision, FeedbackGate, FeedbackTracker, PhrasePool, MAX_FEEDBACK_CHARS};
pub use push::{ChannelRegistry, DeliveryError, Envelope, Transport};
pub use relay::{InferenceCallback, InferenceRelay, RelayOutcome};
pub use sensor::{IngestError, PressureSample, RawPressureReading, Side};
pub use session::{SessionInfo, SessionRegistry};
pub use stats::{PipelineStats, SharedStats, StatsSnapshot};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
