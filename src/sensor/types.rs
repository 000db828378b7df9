//! Pressure sample types for the instrumented insoles.
//!
//! A sample only ever carries ratios. Raw voltages are converted at the
//! ingest boundary by [`RawPressureReading::into_sample`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of pressure zones on one insole.
pub const ZONE_COUNT: usize = 6;

/// Which foot a reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            _ => Err(IngestError::UnknownSide(s.to_string())),
        }
    }
}

/// One reading from one insole at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureSample {
    /// Foot the reading came from
    pub side: Side,
    /// Share of total pressure per zone, in percent (zone 1 at index 0)
    pub ratios: [f64; ZONE_COUNT],
    /// Ingestion time
    pub observed_at: DateTime<Utc>,
}

impl PressureSample {
    /// Create a sample observed now.
    pub fn new(side: Side, ratios: [f64; ZONE_COUNT]) -> Self {
        Self::at(side, ratios, Utc::now())
    }

    /// Create a sample with an explicit observation time.
    pub fn at(side: Side, ratios: [f64; ZONE_COUNT], observed_at: DateTime<Utc>) -> Self {
        Self {
            side,
            ratios,
            observed_at,
        }
    }

    /// Zero-valued placeholder for a side that has never reported.
    pub fn zeroed(side: Side) -> Self {
        Self {
            side,
            ratios: [0.0; ZONE_COUNT],
            observed_at: DateTime::<Utc>::default(),
        }
    }

    /// Ratio for a 1-based zone number, as the insole labels them.
    pub fn zone(&self, zone: usize) -> f64 {
        self.ratios[zone - 1]
    }
}

/// Sensor payload as posted by the insole firmware.
///
/// Firmware revisions differ: older boards send ratios, newer ones send
/// raw voltages and leave the ratio fields at zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPressureReading {
    pub side: Option<String>,
    pub voltage1: Option<f64>,
    pub voltage2: Option<f64>,
    pub voltage3: Option<f64>,
    pub voltage4: Option<f64>,
    pub voltage5: Option<f64>,
    pub voltage6: Option<f64>,
    #[serde(default)]
    pub ratio1: f64,
    #[serde(default)]
    pub ratio2: f64,
    #[serde(default)]
    pub ratio3: f64,
    #[serde(default)]
    pub ratio4: f64,
    #[serde(default)]
    pub ratio5: f64,
    #[serde(default)]
    pub ratio6: f64,
}

impl RawPressureReading {
    fn voltages(&self) -> [Option<f64>; ZONE_COUNT] {
        [
            self.voltage1,
            self.voltage2,
            self.voltage3,
            self.voltage4,
            self.voltage5,
            self.voltage6,
        ]
    }

    fn sent_ratios(&self) -> [f64; ZONE_COUNT] {
        [
            self.ratio1,
            self.ratio2,
            self.ratio3,
            self.ratio4,
            self.ratio5,
            self.ratio6,
        ]
    }

    /// Resolve the six ratios for this payload.
    ///
    /// If no voltage is present the sent ratios are used as-is. Otherwise
    /// missing voltages count as zero and each ratio is the zone's share of
    /// the total voltage. A zero total keeps the sent ratios.
    pub fn resolve_ratios(&self) -> [f64; ZONE_COUNT] {
        let voltages = self.voltages();
        if voltages.iter().all(Option::is_none) {
            return self.sent_ratios();
        }

        let voltages = voltages.map(|v| v.unwrap_or(0.0));
        let total: f64 = voltages.iter().sum();
        if total <= 0.0 {
            tracing::warn!(
                "Total voltage is zero, keeping sent ratios {:?}",
                self.sent_ratios()
            );
            return self.sent_ratios();
        }

        voltages.map(|v| v / total * 100.0)
    }

    /// Convert into a sample observed at `observed_at`.
    pub fn into_sample(self, observed_at: DateTime<Utc>) -> Result<PressureSample, IngestError> {
        let side = self
            .side
            .as_deref()
            .ok_or(IngestError::MissingSide)?
            .parse::<Side>()?;
        Ok(PressureSample::at(side, self.resolve_ratios(), observed_at))
    }
}

/// Reasons an inbound reading is dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    MissingSide,
    UnknownSide(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::MissingSide => write!(f, "Reading has no side"),
            IngestError::UnknownSide(s) => write!(f, "Unknown side value: {s:?}"),
        }
    }
}

impl std::error::Error for IngestError {}
