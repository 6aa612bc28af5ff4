//! Forward obstacle detector.
//!
//! Aggregates the N closest edge readings inside a lateral region of
//! interest into a per-frame [`ObstacleVerdict`].
//!
//! Two triggers can block the path:
//!
//! 1. The *representative row* (mean of the N nearest readings) lies below
//!    the mode's threshold row.
//! 2. The *thin-object rule*: at least `min_hits` of those readings lie below
//!    the threshold on their own.  A chair leg may occupy only two or three
//!    columns; averaging it with the far background would hide it, so a few
//!    close readings are enough to block.

use std::ops::Range;

use crewsafe_types::{ObstacleVerdict, OperatingMode, Side};
use serde::{Deserialize, Serialize};

use crate::scanner::{ColumnEdge, ScanResult};

/// Tuning knobs for [`ObstacleDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Threshold row as a fraction of frame height in normal/precision mode.
    pub forward_threshold_ratio: f32,
    /// Threshold row fraction in approach mode (closer to the bottom, so
    /// nearer obstacles are tolerated).
    pub approach_threshold_ratio: f32,
    /// How many of the nearest edge readings are aggregated.
    pub thin_object_top_n: usize,
    /// Close readings needed to block on their own.
    pub thin_object_min_hits: usize,
    /// Fraction of the width ignored on each side in normal/approach mode.
    pub normal_lateral_margin: f32,
    /// Fraction ignored on each side in precision mode.
    pub precision_lateral_margin: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            forward_threshold_ratio: 0.875,
            approach_threshold_ratio: 0.95,
            thin_object_top_n: 5,
            thin_object_min_hits: 2,
            normal_lateral_margin: 0.10,
            precision_lateral_margin: 0.25,
        }
    }
}

impl DetectorConfig {
    pub fn threshold_ratio(&self, mode: OperatingMode) -> f32 {
        match mode {
            OperatingMode::Approach => self.approach_threshold_ratio,
            OperatingMode::Normal | OperatingMode::Precision => self.forward_threshold_ratio,
        }
    }

    /// Pixel row past which an edge counts as "close" for `mode`.
    pub fn threshold_row(&self, height: usize, mode: OperatingMode) -> f32 {
        self.threshold_ratio(mode) * height as f32
    }

    /// Columns considered by the detector in `mode`.
    pub fn roi(&self, width: usize, mode: OperatingMode) -> Range<usize> {
        let margin = match mode {
            OperatingMode::Precision => self.precision_lateral_margin,
            OperatingMode::Normal | OperatingMode::Approach => self.normal_lateral_margin,
        };
        let skip = (width as f32 * margin.clamp(0.0, 0.49)).round() as usize;
        skip..width.saturating_sub(skip)
    }
}

/// Stateless per-frame obstacle decision.
#[derive(Debug, Clone, Default)]
pub struct ObstacleDetector {
    config: DetectorConfig,
}

impl ObstacleDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect(&self, scan: &ScanResult, mode: OperatingMode) -> ObstacleVerdict {
        let roi = self.config.roi(scan.width, mode);
        let nearest = scan.nearest_edges(roi.clone(), self.config.thin_object_top_n.max(1));
        if nearest.is_empty() {
            return ObstacleVerdict::clear();
        }

        let threshold = self.config.threshold_row(scan.height, mode);
        let mean_row = nearest.iter().map(|e| e.row as f32).sum::<f32>() / nearest.len() as f32;
        let close: Vec<&ColumnEdge> = nearest
            .iter()
            .filter(|e| e.row as f32 > threshold)
            .collect();

        let blocked =
            mean_row > threshold || close.len() >= self.config.thin_object_min_hits.max(1);

        // Side comes from every close column in the ROI, not just the top N,
        // so a wide wall reads as centered rather than as its leftmost edge.
        let side = if blocked {
            let mut columns: Vec<usize> = scan.columns[roi.start.min(scan.columns.len())
                ..roi.end.min(scan.columns.len())]
                .iter()
                .filter(|c| c.nearest_row.is_some_and(|r| r as f32 > threshold))
                .map(|c| c.column)
                .collect();
            if columns.is_empty() {
                columns.push(nearest[0].column);
            }
            let mean_col = columns.iter().sum::<usize>() as f32 / columns.len() as f32;
            side_of(mean_col, scan.width)
        } else {
            Side::None
        };

        let last_row = scan.height.saturating_sub(1).max(1) as f32;
        let distance_estimate = (1.0 - mean_row / last_row).clamp(0.0, 1.0);

        ObstacleVerdict {
            blocked,
            distance_estimate,
            side,
            representative_row: Some(mean_row.round() as usize),
            close_hits: close.len(),
        }
    }
}

fn side_of(column: f32, width: usize) -> Side {
    let third = width as f32 / 3.0;
    if column < third {
        Side::Left
    } else if column < 2.0 * third {
        Side::Center
    } else {
        Side::Right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 640;
    const H: usize = 480;

    fn scan_with(f: impl Fn(usize) -> Option<usize>) -> ScanResult {
        let rows: Vec<Option<usize>> = (0..W).map(f).collect();
        ScanResult::from_rows(W, H, &rows)
    }

    #[test]
    fn threshold_row_follows_mode() {
        let cfg = DetectorConfig::default();
        assert_eq!(cfg.threshold_row(H, OperatingMode::Normal), 420.0);
        assert_eq!(cfg.threshold_row(H, OperatingMode::Precision), 420.0);
        assert_eq!(cfg.threshold_row(H, OperatingMode::Approach), 456.0);
    }

    #[test]
    fn roi_narrows_in_precision_mode() {
        let cfg = DetectorConfig::default();
        assert_eq!(cfg.roi(W, OperatingMode::Normal), 64..576);
        assert_eq!(cfg.roi(W, OperatingMode::Precision), 160..480);
    }

    #[test]
    fn near_wall_blocks_and_far_wall_does_not() {
        let det = ObstacleDetector::default();
        let near = det.detect(&scan_with(|_| Some(430)), OperatingMode::Normal);
        assert!(near.blocked);
        assert_eq!(near.side, Side::Center);
        assert_eq!(near.representative_row, Some(430));

        let far = det.detect(&scan_with(|_| Some(400)), OperatingMode::Normal);
        assert!(!far.blocked);
        assert_eq!(far.side, Side::None);
    }

    #[test]
    fn empty_scan_is_clear() {
        let det = ObstacleDetector::default();
        let verdict = det.detect(&scan_with(|_| None), OperatingMode::Normal);
        assert_eq!(verdict, ObstacleVerdict::clear());
    }

    #[test]
    fn thin_object_blocks_even_when_mean_is_far() {
        // Chair leg: two columns reach row 470, everything else sits at 200.
        // Mean of top 5 = (470 + 470 + 200 * 3) / 5 = 308, well above 420.
        let det = ObstacleDetector::default();
        let scan = scan_with(|c| if c == 500 || c == 501 { Some(470) } else { Some(200) });
        let verdict = det.detect(&scan, OperatingMode::Normal);
        assert!(verdict.blocked);
        assert_eq!(verdict.close_hits, 2);
        assert_eq!(verdict.side, Side::Right);
    }

    #[test]
    fn single_close_reading_is_not_enough() {
        let det = ObstacleDetector::default();
        let scan = scan_with(|c| if c == 300 { Some(470) } else { Some(200) });
        let verdict = det.detect(&scan, OperatingMode::Normal);
        assert!(!verdict.blocked);
        assert_eq!(verdict.close_hits, 1);
    }

    #[test]
    fn edges_outside_roi_are_ignored() {
        let det = ObstacleDetector::default();
        let scan = scan_with(|c| if c < 20 { Some(470) } else { None });
        assert!(!det.detect(&scan, OperatingMode::Normal).blocked);
    }

    #[test]
    fn precision_mode_ignores_door_frame_at_margins() {
        // Door frame posts at columns 100..150 and 490..540, floor clear between.
        let det = ObstacleDetector::default();
        let scan = scan_with(|c| {
            if (100..150).contains(&c) || (490..540).contains(&c) {
                Some(470)
            } else {
                None
            }
        });
        assert!(det.detect(&scan, OperatingMode::Normal).blocked);
        assert!(!det.detect(&scan, OperatingMode::Precision).blocked);
    }

    #[test]
    fn approach_mode_tolerates_closer_edges() {
        let det = ObstacleDetector::default();
        let scan = scan_with(|_| Some(440));
        assert!(det.detect(&scan, OperatingMode::Normal).blocked);
        assert!(!det.detect(&scan, OperatingMode::Approach).blocked);
    }

    #[test]
    fn distance_estimate_is_normalized() {
        let det = ObstacleDetector::default();
        let v = det.detect(&scan_with(|_| Some(H - 1)), OperatingMode::Normal);
        assert!(v.distance_estimate.abs() < 1e-6);
        let v = det.detect(&scan_with(|_| Some(0)), OperatingMode::Normal);
        assert!((v.distance_estimate - 1.0).abs() < 1e-6);
    }

    #[test]
    fn side_reflects_obstacle_position() {
        let det = ObstacleDetector::default();
        let scan = scan_with(|c| if (70..100).contains(&c) { Some(460) } else { None });
        assert_eq!(det.detect(&scan, OperatingMode::Normal).side, Side::Left);
    }
}
