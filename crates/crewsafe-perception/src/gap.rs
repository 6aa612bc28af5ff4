//! Gap/alignment analyzer used in precision mode.
//!
//! A column is *open* when its nearest edge does not reach the forward
//! threshold row.  The widest contiguous run of open columns is the
//! candidate gap; its center relative to the frame center becomes the
//! alignment hint.
//!
//! The [`GapStrategy::Hybrid`] strategy additionally scores a horizontal
//! strip of the frame: textured or bright columns (high variance, high mean)
//! are unlikely to be open floor or a doorway and are excluded.

use crewsafe_types::{GapTarget, Guidance};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::preprocess::GrayFrame;
use crate::scanner::ScanResult;

/// How open columns are decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStrategy {
    /// Edge profile only.
    #[default]
    EdgeProfile,
    /// Edge profile plus a brightness/variance score over a mid-frame strip.
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    /// Narrowest gap (cm) the robot body fits through.
    pub min_gap_width_cm: f32,
    /// Real-world width (cm) spanned by the full image at the threshold row.
    pub view_width_cm: f32,
    /// `|center_offset|` at or below which the robot counts as aligned.
    pub centering_tolerance: f32,
    /// Top of the scored strip, as a fraction of frame height.
    pub strip_start: f32,
    /// Bottom of the scored strip, as a fraction of frame height.
    pub strip_end: f32,
    pub strategy: GapStrategy,
    /// Highest hybrid score a column may have and still be open.
    pub hybrid_open_score: f32,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            min_gap_width_cm: 35.0,
            view_width_cm: 120.0,
            centering_tolerance: 0.15,
            strip_start: 0.4,
            strip_end: 0.6,
            strategy: GapStrategy::EdgeProfile,
            hybrid_open_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GapAnalyzer {
    config: GapConfig,
}

impl GapAnalyzer {
    pub fn new(config: GapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GapConfig {
        &self.config
    }

    /// Find the widest passable gap.
    ///
    /// `threshold_row` must be the same row the obstacle detector used for
    /// this frame so that "open" and "not blocked" agree.
    pub fn analyze(&self, scan: &ScanResult, frame: &GrayFrame, threshold_row: f32) -> GapTarget {
        let width = scan.width;
        if width == 0 {
            return GapTarget::not_found(0.0);
        }

        let scores = match self.config.strategy {
            GapStrategy::EdgeProfile => None,
            GapStrategy::Hybrid => Some(self.strip_scores(frame)),
        };

        let open: Vec<bool> = scan
            .columns
            .iter()
            .map(|c| {
                let edge_open = c.nearest_row.is_none_or(|r| r as f32 <= threshold_row);
                let score_open = scores
                    .as_ref()
                    .and_then(|s| s.get(c.column))
                    .is_none_or(|&s| s <= self.config.hybrid_open_score);
                edge_open && score_open
            })
            .collect();

        let Some((start, end)) = widest_run(&open) else {
            trace!("no open columns");
            return GapTarget::not_found(0.0);
        };

        let run_len = end - start + 1;
        let gap_width_estimate = run_len as f32 / width as f32 * self.config.view_width_cm;
        if gap_width_estimate < self.config.min_gap_width_cm {
            trace!(gap_width_estimate, "widest gap too narrow");
            return GapTarget::not_found(gap_width_estimate);
        }

        let half = width as f32 / 2.0;
        let center = (start + end) as f32 / 2.0;
        let center_offset = ((center - half) / half).clamp(-1.0, 1.0);

        let guidance = if center_offset.abs() <= self.config.centering_tolerance {
            Guidance::Aligned
        } else if center_offset < 0.0 {
            Guidance::TargetLeft
        } else {
            Guidance::TargetRight
        };

        GapTarget {
            gap_found: true,
            center_offset,
            gap_width_estimate,
            guidance,
        }
    }

    /// Per-column score over the mid-frame strip:
    /// `0.4 * mean/255 + 0.6 * var/max_var`.  Low scores are dark and
    /// smooth, which is what open space through a doorway tends to look like.
    pub fn strip_scores(&self, frame: &GrayFrame) -> Vec<f32> {
        let h = frame.height;
        let top = ((h as f32 * self.config.strip_start) as usize).min(h.saturating_sub(1));
        let bottom = ((h as f32 * self.config.strip_end) as usize).clamp(top + 1, h.max(top + 1));
        let rows = (bottom - top).max(1) as f32;

        let mut means = Vec::with_capacity(frame.width);
        let mut vars = Vec::with_capacity(frame.width);
        for x in 0..frame.width {
            let samples = (top..bottom.min(h)).map(|y| frame.get(x, y));
            let mean = samples.clone().sum::<f32>() / rows;
            let var = samples.map(|v| (v - mean) * (v - mean)).sum::<f32>() / rows;
            means.push(mean);
            vars.push(var);
        }

        let max_var = vars.iter().copied().fold(0.0_f32, f32::max);
        means
            .iter()
            .zip(&vars)
            .map(|(&m, &v)| {
                let norm_var = if max_var > 0.0 { v / max_var } else { 0.0 };
                0.4 * (m / 255.0) + 0.6 * norm_var
            })
            .collect()
    }
}

/// Inclusive bounds of the longest run of `true`.  Earlier runs win ties.
fn widest_run(open: &[bool]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut run_start: Option<usize> = None;

    for (i, &is_open) in open.iter().chain(std::iter::once(&false)).enumerate() {
        match (is_open, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(s)) => {
                let candidate = (s, i - 1);
                if best.is_none_or(|(bs, be)| candidate.1 - candidate.0 > be - bs) {
                    best = Some(candidate);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 640;
    const H: usize = 480;
    const THRESHOLD: f32 = 420.0;

    fn scan_with(f: impl Fn(usize) -> Option<usize>) -> ScanResult {
        let rows: Vec<Option<usize>> = (0..W).map(f).collect();
        ScanResult::from_rows(W, H, &rows)
    }

    fn flat_frame() -> GrayFrame {
        GrayFrame::from_fn(W, H, |_, _| 90.0)
    }

    #[test]
    fn widest_run_picks_longest() {
        let open = [true, false, true, true, true, false, true, true];
        assert_eq!(widest_run(&open), Some((2, 4)));
        assert_eq!(widest_run(&[false, false]), None);
        assert_eq!(widest_run(&[true, true]), Some((0, 1)));
    }

    #[test]
    fn gap_left_of_center_targets_left() {
        let scan = scan_with(|c| if (100..=300).contains(&c) { None } else { Some(470) });
        let gap = GapAnalyzer::default().analyze(&scan, &flat_frame(), THRESHOLD);
        assert!(gap.gap_found);
        assert!((gap.center_offset - -0.375).abs() < 1e-4);
        assert_eq!(gap.guidance, Guidance::TargetLeft);
        assert!((gap.gap_width_estimate - 201.0 / 640.0 * 120.0).abs() < 1e-3);
    }

    #[test]
    fn centered_gap_is_aligned() {
        let scan = scan_with(|c| if (220..=420).contains(&c) { Some(100) } else { Some(470) });
        let gap = GapAnalyzer::default().analyze(&scan, &flat_frame(), THRESHOLD);
        assert_eq!(gap.guidance, Guidance::Aligned);
    }

    #[test]
    fn gap_right_of_center_targets_right() {
        let scan = scan_with(|c| if (420..=620).contains(&c) { None } else { Some(470) });
        let gap = GapAnalyzer::default().analyze(&scan, &flat_frame(), THRESHOLD);
        assert_eq!(gap.guidance, Guidance::TargetRight);
        assert!(gap.center_offset > 0.0);
    }

    #[test]
    fn narrow_gap_is_not_forced() {
        // 100 columns ≈ 18.75 cm, below the 35 cm minimum.
        let scan = scan_with(|c| if (300..400).contains(&c) { None } else { Some(470) });
        let gap = GapAnalyzer::default().analyze(&scan, &flat_frame(), THRESHOLD);
        assert!(!gap.gap_found);
        assert_eq!(gap.guidance, Guidance::NoGap);
        assert!((gap.gap_width_estimate - 18.75).abs() < 1e-3);
    }

    #[test]
    fn fully_blocked_view_has_no_gap() {
        let scan = scan_with(|_| Some(470));
        let gap = GapAnalyzer::default().analyze(&scan, &flat_frame(), THRESHOLD);
        assert_eq!(gap, GapTarget::not_found(0.0));
    }

    #[test]
    fn hybrid_strategy_rejects_textured_columns() {
        // Edge profile says everything is open; the right half of the strip
        // is bright and striped, so only the left half stays open.
        let frame = GrayFrame::from_fn(W, H, |x, y| {
            if x >= 320 { if y % 2 == 0 { 250.0 } else { 120.0 } } else { 40.0 }
        });
        let scan = scan_with(|_| None);
        let analyzer = GapAnalyzer::new(GapConfig {
            strategy: GapStrategy::Hybrid,
            ..GapConfig::default()
        });
        let gap = analyzer.analyze(&scan, &frame, THRESHOLD);
        assert!(gap.gap_found);
        assert_eq!(gap.guidance, Guidance::TargetLeft);
        assert!((gap.gap_width_estimate - 60.0).abs() < 1e-3);
    }

    #[test]
    fn strip_scores_are_low_for_dark_smooth_columns() {
        let frame = GrayFrame::from_fn(4, 10, |x, y| if x == 3 && y % 2 == 0 { 255.0 } else { 0.0 });
        let scores = GapAnalyzer::default().strip_scores(&frame);
        assert_eq!(scores[0], 0.0);
        assert!(scores[3] > 0.6);
    }
}
