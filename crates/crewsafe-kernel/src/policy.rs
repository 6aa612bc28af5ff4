//! [`MotionPolicy`] – ordered rule engine behind the motion gate.
//!
//! Every registered [`GateRule`] is evaluated in insertion order against a
//! [`GateContext`]; the first violation returns
//! [`SafetyError::InvalidRequest`] carrying the [`RejectReason`] and the
//! request is **not** executed.
//!
//! [`MotionPolicy::standard`] installs the built-in rules in this order:
//!
//! 1. [`NoConsecutiveBackward`]
//! 2. [`NoMotionInProgress`]
//! 3. [`ValidMagnitude`]
//! 4. [`VisionAvailable`] (forward only)
//! 5. [`RangeStopOverride`] (forward only)
//! 6. [`ForwardClearance`] (forward only)

use std::time::{Duration, Instant};

use crewsafe_types::{
    Direction, DetectorSnapshot, MotionRequest, OperatingMode, RejectReason, SafetyError,
};

use crate::motion_gate::GateConfig;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// Everything a rule may look at when judging a request.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    pub request: &'a MotionRequest,
    pub snapshot: &'a DetectorSnapshot,
    /// Direction of the last executed motion.
    pub last_direction: Option<Direction>,
    pub motion_in_progress: bool,
    pub now: Instant,
}

/// A single admission rule for motion requests.
pub trait GateRule: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Return `Ok(())` when the request may proceed, or
    /// [`SafetyError::InvalidRequest`] when it must be rejected.
    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError>;
}

fn reject(reason: RejectReason) -> Result<(), SafetyError> {
    Err(SafetyError::InvalidRequest(reason))
}

// ────────────────────────────────────────────────────────────────────────────
// MotionPolicy
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine validating a [`MotionRequest`] before it is dispatched.
///
/// # Example
///
/// ```
/// use std::time::{Duration, Instant};
/// use crewsafe_kernel::policy::{GateContext, MotionPolicy, NoConsecutiveBackward};
/// use crewsafe_types::{DetectorSnapshot, Direction, MotionRequest, OperatingMode};
///
/// let mut policy = MotionPolicy::new();
/// policy.add_rule(Box::new(NoConsecutiveBackward));
///
/// let snapshot = DetectorSnapshot::initial(Duration::from_millis(500));
/// let request = MotionRequest::new(Direction::Backward, OperatingMode::Normal, 0.3);
/// let ctx = GateContext {
///     request: &request,
///     snapshot: &snapshot,
///     last_direction: Some(Direction::Backward),
///     motion_in_progress: false,
///     now: Instant::now(),
/// };
/// assert!(policy.verify(&ctx).is_err());
/// ```
#[derive(Default)]
pub struct MotionPolicy {
    rules: Vec<Box<dyn GateRule>>,
}

impl MotionPolicy {
    /// Create an empty policy with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rule set, configured from `config`.
    pub fn standard(config: &GateConfig) -> Self {
        let mut policy = Self::new();
        policy.add_rule(Box::new(NoConsecutiveBackward));
        policy.add_rule(Box::new(NoMotionInProgress));
        policy.add_rule(Box::new(ValidMagnitude {
            max_duration: config.max_motion_duration,
        }));
        policy.add_rule(Box::new(VisionAvailable {
            max_age: config.vision_max_age,
        }));
        policy.add_rule(Box::new(RangeStopOverride {
            stop_cm: config.range_stop_cm,
            approach_stop_cm: config.approach_stop_cm,
            max_age: config.range_max_age,
        }));
        policy.add_rule(Box::new(ForwardClearance));
        policy
    }

    /// Register a new [`GateRule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn GateRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Validate against every rule; the first violation wins.
    pub fn verify(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        for rule in &self.rules {
            rule.check(ctx)?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Two backward moves in a row are never both executed.
pub struct NoConsecutiveBackward;

impl GateRule for NoConsecutiveBackward {
    fn name(&self) -> &str {
        "no_consecutive_backward"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        if ctx.request.direction == Direction::Backward
            && ctx.last_direction == Some(Direction::Backward)
        {
            return reject(RejectReason::ConsecutiveBackward);
        }
        Ok(())
    }
}

/// Requests are never queued behind a running motion.
pub struct NoMotionInProgress;

impl GateRule for NoMotionInProgress {
    fn name(&self) -> &str {
        "no_motion_in_progress"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        if ctx.motion_in_progress {
            return reject(RejectReason::MotionInProgress);
        }
        Ok(())
    }
}

/// Magnitude must be finite, positive, and translate into a bounded duration.
pub struct ValidMagnitude {
    pub max_duration: Duration,
}

impl GateRule for ValidMagnitude {
    fn name(&self) -> &str {
        "valid_magnitude"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        let m = ctx.request.magnitude;
        if !m.is_finite() || m <= 0.0 || ctx.request.duration() > self.max_duration {
            return reject(RejectReason::InvalidMagnitude);
        }
        Ok(())
    }
}

/// Forward motion needs a fresh, valid vision verdict.
pub struct VisionAvailable {
    pub max_age: Duration,
}

impl GateRule for VisionAvailable {
    fn name(&self) -> &str {
        "vision_available"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        if ctx.request.direction == Direction::Forward
            && !ctx.snapshot.vision_fresh(ctx.now, self.max_age)
        {
            return reject(RejectReason::VisionUnavailable);
        }
        Ok(())
    }
}

/// A range reading inside the stop distance blocks forward motion whatever
/// vision says.
///
/// The zone is recomputed from the raw sample at `now` against the request's
/// own mode; the zone stored at publish time may be stale or computed for
/// another mode.  A stale sample leaves the decision to vision.
pub struct RangeStopOverride {
    pub stop_cm: f32,
    pub approach_stop_cm: f32,
    pub max_age: Duration,
}

impl RangeStopOverride {
    fn stop_cm(&self, mode: OperatingMode) -> f32 {
        match mode {
            OperatingMode::Approach => self.approach_stop_cm,
            OperatingMode::Normal | OperatingMode::Precision => self.stop_cm,
        }
    }
}

impl GateRule for RangeStopOverride {
    fn name(&self) -> &str {
        "range_stop_override"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        if ctx.request.direction != Direction::Forward {
            return Ok(());
        }
        if let Some(sample) = ctx.snapshot.range {
            let sample = sample.effective(ctx.now, self.max_age);
            if sample.sensor_ok && sample.distance_cm < self.stop_cm(ctx.request.mode) {
                return reject(RejectReason::RangeStop);
            }
        }
        Ok(())
    }
}

/// The stabilized vision verdict must be clear for forward motion, and must
/// have been computed in a mode at least as strict as the request's.
pub struct ForwardClearance;

impl GateRule for ForwardClearance {
    fn name(&self) -> &str {
        "forward_clearance"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), SafetyError> {
        if ctx.request.direction != Direction::Forward {
            return Ok(());
        }
        if !ctx.snapshot.mode.covers(ctx.request.mode) {
            return reject(RejectReason::ModeMismatch {
                requested: ctx.request.mode,
                published: ctx.snapshot.mode,
            });
        }
        if ctx.snapshot.stabilized.blocked {
            return reject(RejectReason::ForwardBlocked);
        }
        Ok(())
    }
}
