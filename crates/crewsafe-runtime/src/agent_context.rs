//! Decision context handed to the autonomous agent.
//!
//! The agent never sees raw perception data.  It gets a short plain-text
//! summary of what the safety core currently allows, plus the JSON schema of
//! [`MotionRequest`] so its output can be validated before submission.

use crewsafe_types::{Direction, Guidance, MotionRequest, RangeZone, Side};
use serde::Serialize;

use crate::safety_core::StatusReport;

#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub text: String,
    pub motion_schema: serde_json::Value,
}

impl AgentContext {
    pub fn from_status(status: &StatusReport) -> Self {
        Self {
            text: describe(status),
            motion_schema: motion_request_schema(),
        }
    }
}

/// JSON schema of [`MotionRequest`].
pub fn motion_request_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(MotionRequest)).unwrap_or(serde_json::Value::Null)
}

fn side_label(side: Side) -> &'static str {
    match side {
        Side::Left => "on the left",
        Side::Center => "straight ahead",
        Side::Right => "on the right",
        Side::None => "at an unknown position",
    }
}

fn describe(status: &StatusReport) -> String {
    let mut lines = vec![format!("Operating mode: {}.", status.mode)];

    lines.push(if !status.vision_ok {
        "Forward path: UNKNOWN. Vision is unavailable, forward motion will be refused.".to_string()
    } else if status.blocked {
        format!(
            "Forward path: BLOCKED, obstacle {}. Turn or strafe before moving forward.",
            side_label(status.verdict.side)
        )
    } else {
        "Forward path: clear.".to_string()
    });

    lines.push(match (status.range_zone, status.range_cm) {
        (RangeZone::Stop, Some(cm)) => {
            format!("Range sensor: {cm:.0} cm, inside the stop distance. Forward motion will be refused.")
        }
        (RangeZone::Caution, Some(cm)) => format!("Range sensor: {cm:.0} cm, proceed with caution."),
        (RangeZone::Clear, Some(cm)) => format!("Range sensor: {cm:.0} cm, clear."),
        _ => "Range sensor: no reading, decisions rely on vision only.".to_string(),
    });

    let gap = status.gap;
    lines.push(match gap.guidance {
        Guidance::Aligned => format!(
            "Gap guidance: aligned with a {:.0} cm opening, forward is the best option.",
            gap.gap_width_estimate
        ),
        Guidance::TargetLeft => format!(
            "Gap guidance: opening to the left (offset {:+.2}, {:.0} cm wide). Rotate left slightly.",
            gap.center_offset, gap.gap_width_estimate
        ),
        Guidance::TargetRight => format!(
            "Gap guidance: opening to the right (offset {:+.2}, {:.0} cm wide). Rotate right slightly.",
            gap.center_offset, gap.gap_width_estimate
        ),
        Guidance::NoGap => format!(
            "Gap guidance: no passable opening (widest {:.0} cm). Do not force an alignment.",
            gap.gap_width_estimate
        ),
        Guidance::Inactive => "Gap guidance: off. Switch to precision mode to look for doorways.".to_string(),
    });

    if let Some(direction) = status.active_motion {
        lines.push(format!(
            "A {direction} motion is in progress. New requests are refused until it ends."
        ));
    }
    if status.last_motion == Some(Direction::Backward) {
        lines.push("Last motion was backward. Another backward move will be refused.".to_string());
    }

    lines.push(
        "Reply with one MotionRequest as JSON. Magnitude is metres for linear moves and degrees for turns."
            .to_string(),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crewsafe_types::{GapTarget, ObstacleVerdict, OperatingMode};

    fn status() -> StatusReport {
        StatusReport {
            version: 7,
            mode: OperatingMode::Normal,
            applied_mode: OperatingMode::Normal,
            blocked: false,
            raw_blocked: false,
            verdict: ObstacleVerdict::clear(),
            gap: GapTarget::inactive(),
            range_cm: None,
            range_zone: RangeZone::Unavailable,
            vision_ok: true,
            snapshot_age_ms: 12,
            active_motion: None,
            last_motion: None,
            published_at: Utc::now(),
        }
    }

    #[test]
    fn clear_path_summary() {
        let ctx = AgentContext::from_status(&status());
        assert!(ctx.text.contains("Forward path: clear."));
        assert!(ctx.text.contains("rely on vision only"));
        assert!(ctx.text.contains("Gap guidance: off"));
    }

    #[test]
    fn blocked_and_backward_are_spelled_out() {
        let mut s = status();
        s.blocked = true;
        s.verdict = ObstacleVerdict {
            side: Side::Left,
            ..ObstacleVerdict::unknown_unsafe()
        };
        s.last_motion = Some(Direction::Backward);
        let text = AgentContext::from_status(&s).text;
        assert!(text.contains("BLOCKED, obstacle on the left"));
        assert!(text.contains("Another backward move will be refused"));
    }

    #[test]
    fn missing_vision_wins_over_clear_verdict() {
        let mut s = status();
        s.vision_ok = false;
        assert!(AgentContext::from_status(&s).text.contains("UNKNOWN"));
    }

    #[test]
    fn precision_guidance_is_included() {
        let mut s = status();
        s.mode = OperatingMode::Precision;
        s.gap = GapTarget {
            gap_found: true,
            center_offset: -0.375,
            gap_width_estimate: 37.5,
            guidance: Guidance::TargetLeft,
        };
        s.range_cm = Some(42.0);
        s.range_zone = RangeZone::Caution;
        let text = AgentContext::from_status(&s).text;
        assert!(text.contains("opening to the left (offset -0.38"));
        assert!(text.contains("42 cm, proceed with caution"));
    }

    #[test]
    fn schema_describes_motion_request() {
        let schema = motion_request_schema();
        let json = schema.to_string();
        assert!(json.contains("strafe_left"));
        assert!(json.contains("magnitude"));
    }
}
