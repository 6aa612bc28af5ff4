//! Range sensor adapter.
//!
//! Turns raw single-point distance reads into [`RangeSample`]s and
//! classifies them into [`RangeZone`]s.  Readings are smoothed with a
//! short median filter so that a single spurious echo neither trips nor
//! masks the stop zone.
//!
//! A failed or empty read resets the filter: the next good reading is
//! reported as-is rather than blended with data from before the outage.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crewsafe_types::{OperatingMode, RangeSample, RangeZone, SafetyError};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Readings below this distance (cm) hard-block forward motion.
    pub stop_cm: f32,
    /// Readings below this distance (cm) raise a caution.
    pub warn_cm: f32,
    /// Stop distance (cm) used in approach mode.
    pub approach_stop_cm: f32,
    /// Samples older than this are treated as unavailable.
    #[serde(with = "duration_ms")]
    pub max_age: Duration,
    /// Median filter length; `1` disables smoothing.
    pub smoothing_window: usize,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            stop_cm: 30.0,
            warn_cm: 80.0,
            approach_stop_cm: 10.0,
            max_age: Duration::from_millis(250),
            smoothing_window: 3,
        }
    }
}

impl RangeConfig {
    pub fn stop_cm(&self, mode: OperatingMode) -> f32 {
        match mode {
            OperatingMode::Approach => self.approach_stop_cm,
            OperatingMode::Normal | OperatingMode::Precision => self.stop_cm,
        }
    }

    /// Classify a sample taken at `sample.sampled_at` as seen at `now`.
    pub fn classify(&self, sample: Option<&RangeSample>, now: Instant, mode: OperatingMode) -> RangeZone {
        let Some(sample) = sample.map(|s| s.effective(now, self.max_age)) else {
            return RangeZone::Unavailable;
        };
        if !sample.sensor_ok {
            RangeZone::Unavailable
        } else if sample.distance_cm < self.stop_cm(mode) {
            RangeZone::Stop
        } else if sample.distance_cm < self.warn_cm {
            RangeZone::Caution
        } else {
            RangeZone::Clear
        }
    }
}

/// Stateful wrapper that smooths raw distance readings.
#[derive(Debug, Clone)]
pub struct RangeSensorAdapter {
    config: RangeConfig,
    history: VecDeque<f32>,
}

impl RangeSensorAdapter {
    pub fn new(config: RangeConfig) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(config.smoothing_window.max(1)),
        }
    }

    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    /// Fold one raw read into a [`RangeSample`] stamped `at`.
    pub fn ingest(&mut self, raw: Result<Option<f32>, SafetyError>, at: Instant) -> RangeSample {
        match raw {
            Ok(Some(cm)) if cm.is_finite() && cm >= 0.0 => {
                let window = self.config.smoothing_window.max(1);
                if self.history.len() == window {
                    self.history.pop_front();
                }
                self.history.push_back(cm);
                let smoothed = median(&self.history);
                trace!(raw_cm = cm, smoothed_cm = smoothed, "range sample");
                RangeSample::ok(smoothed, at)
            }
            Ok(Some(cm)) => {
                warn!(raw_cm = cm, "discarding invalid range reading");
                self.history.clear();
                RangeSample::failed(at)
            }
            Ok(None) => {
                trace!("range sensor returned no target");
                self.history.clear();
                RangeSample::failed(at)
            }
            Err(e) => {
                warn!(error = %e, "range sensor read failed");
                self.history.clear();
                RangeSample::failed(at)
            }
        }
    }

    pub fn classify(&self, sample: Option<&RangeSample>, now: Instant, mode: OperatingMode) -> RangeZone {
        self.config.classify(sample, now, mode)
    }
}

fn median(values: &VecDeque<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(f32::total_cmp);
    let n = sorted.len();
    if n == 0 {
        f32::INFINITY
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Serialize a [`Duration`] as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
