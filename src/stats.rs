//! Pipeline counters.
//!
//! Tracks how much data flowed through the coach since startup. Nothing
//! here identifies a user; only totals are kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running totals for the current process.
#[derive(Debug)]
pub struct PipelineStats {
    samples_ingested: AtomicU64,
    samples_rejected: AtomicU64,
    telemetry_sent: AtomicU64,
    voice_sent: AtomicU64,
    voice_suppressed: AtomicU64,
    delivery_failures: AtomicU64,
    callbacks_received: AtomicU64,
    started_at: DateTime<Utc>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            samples_rejected: AtomicU64::new(0),
            telemetry_sent: AtomicU64::new(0),
            voice_sent: AtomicU64::new(0),
            voice_suppressed: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            callbacks_received: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_sample_ingested(&self) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_telemetry_sent(&self) {
        self.telemetry_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_voice_sent(&self) {
        self.voice_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A voice candidate was silenced by anti-repeat or cooldown.
    pub fn record_voice_suppressed(&self) {
        self.voice_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback(&self) {
        self.callbacks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_ingested: self.samples_ingested.load(Ordering::Relaxed),
            samples_rejected: self.samples_rejected.load(Ordering::Relaxed),
            telemetry_sent: self.telemetry_sent.load(Ordering::Relaxed),
            voice_sent: self.voice_sent.load(Ordering::Relaxed),
            voice_suppressed: self.voice_suppressed.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            callbacks_received: self.callbacks_received.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub samples_ingested: u64,
    pub samples_rejected: u64,
    pub telemetry_sent: u64,
    pub voice_sent: u64,
    pub voice_suppressed: u64,
    pub delivery_failures: u64,
    pub callbacks_received: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe wrapper.
pub type SharedStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(PipelineStats::new())
}
