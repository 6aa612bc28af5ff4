//! One perception cycle: frame → scan → verdict → stabilized verdict (+ gap)
//! and range reading → zone, folded into a [`DetectorSnapshot`].
//!
//! Camera failures do not invent a verdict.  A failed or corrupt frame skips
//! the cycle and the previous stabilized state is carried forward; once
//! `max_missed_frames` consecutive cycles fail, the pipeline declares vision
//! unavailable and reports the unknown-unsafe verdict until a good frame
//! arrives.

use std::time::{Duration, Instant};

use chrono::Utc;
use crewsafe_hal::CameraFrame;
use crewsafe_types::{
    DetectorSnapshot, GapTarget, ObstacleVerdict, OperatingMode, RangeSample, SafetyError,
    StabilizedVerdict,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::detector::{DetectorConfig, ObstacleDetector};
use crate::gap::{GapAnalyzer, GapConfig};
use crate::hysteresis::HysteresisStabilizer;
use crate::preprocess::preprocess;
use crate::range::{RangeConfig, RangeSensorAdapter, duration_ms};
use crate::scanner::EdgeScanner;

/// Every perception tunable in one place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub edge_sensitivity: f32,
    pub detector: DetectorConfig,
    #[serde(with = "duration_ms")]
    pub decay_window: Duration,
    pub gap: GapConfig,
    pub range: RangeConfig,
    /// Consecutive failed frames tolerated before vision is declared down.
    pub max_missed_frames: u32,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            edge_sensitivity: 30.0,
            detector: DetectorConfig::default(),
            decay_window: Duration::from_millis(500),
            gap: GapConfig::default(),
            range: RangeConfig::default(),
            max_missed_frames: 5,
        }
    }
}

/// Per-frame result before hysteresis, exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameAnalysis {
    pub verdict: ObstacleVerdict,
    pub gap: GapTarget,
    pub threshold_row: f32,
}

pub struct PerceptionPipeline {
    config: PerceptionConfig,
    scanner: EdgeScanner,
    detector: ObstacleDetector,
    stabilizer: HysteresisStabilizer,
    gap: GapAnalyzer,
    range: RangeSensorAdapter,
    missed_frames: u32,
    vision_ok: bool,
    last_gap: GapTarget,
}

impl PerceptionPipeline {
    pub fn new(config: PerceptionConfig) -> Self {
        Self {
            config,
            scanner: EdgeScanner::new(config.edge_sensitivity),
            detector: ObstacleDetector::new(config.detector),
            stabilizer: HysteresisStabilizer::new(config.decay_window),
            gap: GapAnalyzer::new(config.gap),
            range: RangeSensorAdapter::new(config.range),
            missed_frames: 0,
            vision_ok: false,
            last_gap: GapTarget::inactive(),
        }
    }

    pub fn config(&self) -> &PerceptionConfig {
        &self.config
    }

    /// Consecutive cycles without a usable frame.
    pub fn missed_frames(&self) -> u32 {
        self.missed_frames
    }

    /// Analyze a single frame without touching the stabilizer.
    ///
    /// # Errors
    ///
    /// Propagates [`SafetyError::CorruptFrame`] from preprocessing.
    pub fn analyze_frame(
        &self,
        frame: &CameraFrame,
        mode: OperatingMode,
    ) -> Result<FrameAnalysis, SafetyError> {
        let gray = preprocess(frame)?;
        let scan = self.scanner.scan(&gray);
        let verdict = self.detector.detect(&scan, mode);
        let threshold_row = self.detector.config().threshold_row(scan.height, mode);
        let gap = if mode.gap_guidance_enabled() {
            self.gap.analyze(&scan, &gray, threshold_row)
        } else {
            GapTarget::inactive()
        };
        Ok(FrameAnalysis {
            verdict,
            gap,
            threshold_row,
        })
    }

    /// Run one cycle.
    ///
    /// `range` is `None` when no range sensor is configured.  The returned
    /// snapshot has `version == 0`; the shared state assigns the version on
    /// publish.
    pub fn process(
        &mut self,
        frame: Result<CameraFrame, SafetyError>,
        range: Option<Result<Option<f32>, SafetyError>>,
        mode: OperatingMode,
        now: Instant,
    ) -> DetectorSnapshot {
        let analysis = frame.and_then(|f| {
            let captured_at = f.captured_at;
            self.analyze_frame(&f, mode).map(|a| (a, captured_at))
        });

        let stabilized = match analysis {
            Ok((analysis, captured_at)) => {
                if !self.vision_ok && self.missed_frames > 0 {
                    debug!(missed = self.missed_frames, "vision recovered");
                }
                self.missed_frames = 0;
                self.vision_ok = true;
                self.last_gap = analysis.gap;
                self.stabilizer.update(analysis.verdict, captured_at)
            }
            Err(e) => self.on_missed_frame(&e, now),
        };

        let gap = if mode.gap_guidance_enabled() && self.vision_ok {
            self.last_gap
        } else {
            GapTarget::inactive()
        };

        let range_sample: Option<RangeSample> = range.map(|raw| self.range.ingest(raw, now));
        let range_zone = self.range.classify(range_sample.as_ref(), now, mode);

        DetectorSnapshot {
            version: 0,
            mode,
            stabilized,
            gap,
            range: range_sample,
            range_zone,
            vision_ok: self.vision_ok,
            published_at: now,
            published_wall: Utc::now(),
        }
    }

    fn on_missed_frame(&mut self, error: &SafetyError, now: Instant) -> StabilizedVerdict {
        self.missed_frames = self.missed_frames.saturating_add(1);
        if self.missed_frames < self.config.max_missed_frames.max(1) {
            debug!(missed = self.missed_frames, error = %error, "frame skipped");
            return self.stabilizer.current();
        }
        if self.vision_ok || self.missed_frames == self.config.max_missed_frames.max(1) {
            warn!(missed = self.missed_frames, error = %error, "vision unavailable");
        }
        self.vision_ok = false;
        self.stabilizer.mark_unavailable(now)
    }
}
