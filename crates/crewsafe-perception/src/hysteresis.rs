//! Asymmetric hysteresis over per-frame verdicts.
//!
//! A single blocked frame latches the blocked state immediately.  Clearing
//! requires every frame for a full decay window to be unblocked: each new
//! blocked frame refreshes the timer.  An obstacle that flickers in and out
//! of detection therefore never produces an unblocked window shorter than
//! the decay window.

use std::time::{Duration, Instant};

use crewsafe_types::{ObstacleVerdict, StabilizedVerdict};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchState {
    Unblocked,
    Blocked,
}

/// Latches blocked verdicts for a configurable decay window.
#[derive(Debug, Clone)]
pub struct HysteresisStabilizer {
    decay_window: Duration,
    state: LatchState,
    last_blocked_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    held: ObstacleVerdict,
    latest: ObstacleVerdict,
}

impl HysteresisStabilizer {
    pub fn new(decay_window: Duration) -> Self {
        Self {
            decay_window,
            state: LatchState::Unblocked,
            last_blocked_at: None,
            last_frame_at: None,
            held: ObstacleVerdict::clear(),
            latest: ObstacleVerdict::clear(),
        }
    }

    pub fn decay_window(&self) -> Duration {
        self.decay_window
    }

    /// Feed one per-frame verdict observed at `at`.
    ///
    /// Frames older than the last accepted one are dropped and the current
    /// stabilized state is returned unchanged.
    pub fn update(&mut self, verdict: ObstacleVerdict, at: Instant) -> StabilizedVerdict {
        if let Some(last) = self.last_frame_at {
            if at < last {
                warn!(
                    behind_ms = last.duration_since(at).as_millis() as u64,
                    "out-of-order frame dropped by stabilizer"
                );
                return self.current();
            }
        }
        self.last_frame_at = Some(at);
        self.latest = verdict;

        if verdict.blocked {
            if self.state == LatchState::Unblocked {
                debug!(side = ?verdict.side, "stabilizer latched blocked");
            }
            self.state = LatchState::Blocked;
            self.last_blocked_at = Some(at);
            self.held = verdict;
        } else if self.state == LatchState::Blocked {
            let since = self
                .last_blocked_at
                .map(|t| at.saturating_duration_since(t))
                .unwrap_or(Duration::MAX);
            if since > self.decay_window {
                debug!(since_ms = since.as_millis() as u64, "stabilizer released");
                self.state = LatchState::Unblocked;
            }
        }
        self.current()
    }

    /// Treat the path as blocked because no trustworthy frame exists.
    ///
    /// Never dropped as out of order: `at` is clamped to the last frame time.
    pub fn mark_unavailable(&mut self, at: Instant) -> StabilizedVerdict {
        let at = self.last_frame_at.map_or(at, |last| last.max(at));
        self.update(ObstacleVerdict::unknown_unsafe(), at)
    }

    pub fn current(&self) -> StabilizedVerdict {
        let blocked = self.state == LatchState::Blocked;
        StabilizedVerdict {
            verdict: if blocked { self.held } else { self.latest },
            blocked,
            raw_blocked: self.latest.blocked,
            last_blocked_at: self.last_blocked_at,
            decay_window: self.decay_window,
        }
    }
}
