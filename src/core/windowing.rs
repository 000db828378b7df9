//! Sliding-window storage for insole pressure samples.
//!
//! Each side keeps its latest sample plus a trailing window of samples
//! (default 10 seconds). The window is pruned lazily on every append and
//! every read. Left and right live behind separate locks and never block
//! each other.

use crate::sensor::{PressureSample, Side, ZONE_COUNT};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

/// A value held once per foot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerSide<T> {
    pub left: T,
    pub right: T,
}

/// Latest slot and trailing window for one side.
#[derive(Debug, Default)]
struct SideWindow {
    /// Most recently ingested sample, regardless of window retention
    latest: RwLock<Option<PressureSample>>,
    /// Samples in arrival order
    samples: Mutex<VecDeque<PressureSample>>,
}

impl SideWindow {
    fn append(&self, sample: PressureSample, threshold: DateTime<Utc>) {
        *self.latest.write() = Some(sample.clone());

        let mut samples = self.samples.lock();
        samples.push_back(sample);
        prune(&mut samples, threshold);
    }

    fn latest(&self) -> Option<PressureSample> {
        self.latest.read().clone()
    }

    fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// Average the samples at or after `since`, pruning anything older
    /// than `threshold` first.
    fn average(
        &self,
        side: Side,
        threshold: DateTime<Utc>,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<PressureSample> {
        let in_window: Vec<[f64; ZONE_COUNT]> = {
            let mut samples = self.samples.lock();
            prune(&mut samples, threshold);
            samples
                .iter()
                .filter(|s| s.observed_at >= since)
                .map(|s| s.ratios)
                .collect()
        };

        if in_window.is_empty() {
            return None;
        }

        let mut ratios = [0.0; ZONE_COUNT];
        for (zone, slot) in ratios.iter_mut().enumerate() {
            *slot = in_window.iter().map(|r| r[zone]).mean();
        }
        Some(PressureSample::at(side, ratios, now))
    }
}

fn prune(samples: &mut VecDeque<PressureSample>, threshold: DateTime<Utc>) {
    while samples
        .front()
        .is_some_and(|first| first.observed_at < threshold)
    {
        samples.pop_front();
    }
}

/// Windowed store for both insoles.
#[derive(Debug)]
pub struct SensorStore {
    /// Retention window for each side
    window_duration: Duration,
    left: SideWindow,
    right: SideWindow,
}

impl SensorStore {
    /// Create a store retaining `window_duration` of samples per side.
    pub fn new(window_duration: std::time::Duration) -> Self {
        Self {
            window_duration: Duration::milliseconds(window_duration.as_millis() as i64),
            left: SideWindow::default(),
            right: SideWindow::default(),
        }
    }

    fn side(&self, side: Side) -> &SideWindow {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Retention window of this store.
    pub fn window_duration(&self) -> Duration {
        self.window_duration
    }

    /// Record a sample as its side's latest and append it to the window.
    ///
    /// The sample's `observed_at` is the reference time for pruning.
    pub fn ingest(&self, sample: PressureSample) {
        let threshold = sample.observed_at - self.window_duration;
        let side = sample.side;
        self.side(side).append(sample, threshold);
        tracing::debug!("Ingested {} sample", side);
    }

    /// Latest sample per side.
    ///
    /// With `fill_missing`, a side that has never reported is returned as a
    /// zero-valued placeholder so consumers always see both feet.
    pub fn latest_snapshot(&self, fill_missing: bool) -> PerSide<Option<PressureSample>> {
        let resolve = |side: Side| {
            self.side(side)
                .latest()
                .or_else(|| fill_missing.then(|| PressureSample::zeroed(side)))
        };
        PerSide {
            left: resolve(Side::Left),
            right: resolve(Side::Right),
        }
    }

    /// Average of each side's samples over the trailing `duration`.
    pub fn windowed_average(&self, duration: Duration) -> PerSide<Option<PressureSample>> {
        self.windowed_average_at(duration, Utc::now())
    }

    /// Same as [`windowed_average`](Self::windowed_average) with an explicit `now`.
    ///
    /// A side with no samples in the window is `None`, which is distinct
    /// from a side that averaged to zero.
    pub fn windowed_average_at(
        &self,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> PerSide<Option<PressureSample>> {
        let threshold = now - self.window_duration;
        let since = now - duration;
        PerSide {
            left: self.left.average(Side::Left, threshold, since, now),
            right: self.right.average(Side::Right, threshold, since, now),
        }
    }

    /// Number of samples currently retained for `side`.
    pub fn retained(&self, side: Side) -> usize {
        self.side(side).len()
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(10))
    }
}
