use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Nominal drive speed for linear moves (metres per second).
pub const LINEAR_SPEED_MPS: f32 = 0.15;
/// Nominal turn rate (degrees per second).
pub const TURN_SPEED_DPS: f32 = 60.0;

/// Direction of a requested motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    /// Turn in place, counter-clockwise.
    Left,
    /// Turn in place, clockwise.
    Right,
    StrafeLeft,
    StrafeRight,
    /// Halt all motion and cancel whatever is in flight.
    Stop,
}

impl Direction {
    /// `true` for in-place rotations, whose magnitude is measured in degrees.
    pub fn is_turn(self) -> bool {
        matches!(self, Direction::Left | Direction::Right)
    }

    /// Stable lowercase label used in logs, events and the REPL.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::StrafeLeft => "strafe_left",
            Direction::StrafeRight => "strafe_right",
            Direction::Stop => "stop",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Operating mode shared by every pipeline stage and the motion gate.
///
/// Threshold relaxation is always a function of this value; nothing else
/// carries precision/approach flags.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Normal,
    /// Narrower lateral margins for threading doorways; forward thresholds
    /// unchanged. Enables gap guidance.
    Precision,
    /// Relaxed forward stop distance for controlled contact at reduced speed.
    Approach,
}

impl OperatingMode {
    /// Gap guidance is only computed (and only meaningful) in precision mode.
    pub fn gap_guidance_enabled(self) -> bool {
        self == OperatingMode::Precision
    }

    /// Whether a verdict computed in `self` is at least as strict as one
    /// computed in `requested`.  Normal mode uses the widest lateral region
    /// and the nearest threshold row, so its verdicts cover every mode.
    pub fn covers(self, requested: OperatingMode) -> bool {
        self == requested || self == OperatingMode::Normal
    }

    /// Multiplier applied to the nominal drive speed.
    pub fn speed_factor(self) -> f32 {
        match self {
            OperatingMode::Approach => 0.5,
            _ => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            OperatingMode::Normal => "normal",
            OperatingMode::Precision => "precision",
            OperatingMode::Approach => "approach",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for OperatingMode {
    type Err = SafetyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" | "standard" => Ok(OperatingMode::Normal),
            "precision" => Ok(OperatingMode::Precision),
            "approach" => Ok(OperatingMode::Approach),
            other => Err(SafetyError::Config(format!("unknown operating mode '{other}'"))),
        }
    }
}

/// Lateral position of the closest obstacle in the field of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Center,
    Right,
    None,
}

/// Per-frame forward obstacle decision produced by the obstacle detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleVerdict {
    pub blocked: bool,
    /// Normalized distance: `0.0` at the bottom of the frame (touching),
    /// `1.0` at the top or when nothing was seen.
    pub distance_estimate: f32,
    pub side: Side,
    /// Averaged row of the nearest edge readings, if any edge was found.
    pub representative_row: Option<usize>,
    /// How many of the nearest readings fell past the threshold row.
    pub close_hits: usize,
}

impl ObstacleVerdict {
    /// Nothing detected in the region of interest.
    pub fn clear() -> Self {
        Self {
            blocked: false,
            distance_estimate: 1.0,
            side: Side::None,
            representative_row: None,
            close_hits: 0,
        }
    }

    /// Fail-safe verdict used when no trustworthy image is available.
    pub fn unknown_unsafe() -> Self {
        Self {
            blocked: true,
            distance_estimate: 0.0,
            side: Side::None,
            representative_row: None,
            close_hits: 0,
        }
    }
}

/// An [`ObstacleVerdict`] after asymmetric hysteresis.
///
/// Once `blocked` is set it stays set until `now - last_blocked_at`
/// exceeds `decay_window`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilizedVerdict {
    /// The verdict being reported. While the block is held this is the
    /// most recent blocked verdict, not the latest raw one.
    pub verdict: ObstacleVerdict,
    pub blocked: bool,
    /// Whether the most recent raw reading was itself blocked.
    pub raw_blocked: bool,
    #[serde(skip)]
    pub last_blocked_at: Option<Instant>,
    pub decay_window: Duration,
}

impl StabilizedVerdict {
    /// Initial state before any frame was processed: unknown, hence blocked.
    pub fn unknown(decay_window: Duration) -> Self {
        Self {
            verdict: ObstacleVerdict::unknown_unsafe(),
            blocked: true,
            raw_blocked: true,
            last_blocked_at: None,
            decay_window,
        }
    }
}

/// Alignment hint emitted by the gap analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guidance {
    Aligned,
    TargetLeft,
    TargetRight,
    /// No passable gap; callers must not force an alignment.
    NoGap,
    /// Precision mode is off.
    Inactive,
}

impl fmt::Display for Guidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Guidance::Aligned => "aligned",
            Guidance::TargetLeft => "target left",
            Guidance::TargetRight => "target right",
            Guidance::NoGap => "no gap",
            Guidance::Inactive => "inactive",
        };
        f.write_str(text)
    }
}

/// Widest traversable lateral gap. Only meaningful in precision mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapTarget {
    pub gap_found: bool,
    /// Gap center relative to frame center, in `[-1, 1]`; negative is left.
    pub center_offset: f32,
    /// Estimated real-world width of the gap in centimetres.
    pub gap_width_estimate: f32,
    pub guidance: Guidance,
}

impl GapTarget {
    pub fn inactive() -> Self {
        Self {
            gap_found: false,
            center_offset: 0.0,
            gap_width_estimate: 0.0,
            guidance: Guidance::Inactive,
        }
    }

    pub fn not_found(widest_cm: f32) -> Self {
        Self {
            gap_found: false,
            center_offset: 0.0,
            gap_width_estimate: widest_cm,
            guidance: Guidance::NoGap,
        }
    }
}

/// One reading of the single-point range sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RangeSample {
    pub distance_cm: f32,
    pub sensor_ok: bool,
    #[serde(skip)]
    pub sampled_at: Instant,
}

impl RangeSample {
    pub fn ok(distance_cm: f32, sampled_at: Instant) -> Self {
        Self {
            distance_cm,
            sensor_ok: true,
            sampled_at,
        }
    }

    /// A failed read. The distance is meaningless.
    pub fn failed(sampled_at: Instant) -> Self {
        Self {
            distance_cm: f32::INFINITY,
            sensor_ok: false,
            sampled_at,
        }
    }

    /// Return this sample with `sensor_ok` cleared when it is older than
    /// `max_age` at `now`.
    pub fn effective(&self, now: Instant, max_age: Duration) -> RangeSample {
        let age = now.saturating_duration_since(self.sampled_at);
        RangeSample {
            sensor_ok: self.sensor_ok && age <= max_age,
            ..*self
        }
    }
}

/// Range-sensor classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeZone {
    /// Hard-blocks forward motion regardless of vision.
    Stop,
    /// Warning only.
    Caution,
    Clear,
    /// No sensor, failed read, or stale sample.
    Unavailable,
}

/// One atomically published perception cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DetectorSnapshot {
    /// Monotonically increasing publish counter; `0` means nothing has been
    /// published yet.
    pub version: u64,
    pub mode: OperatingMode,
    pub stabilized: StabilizedVerdict,
    pub gap: GapTarget,
    pub range: Option<RangeSample>,
    pub range_zone: RangeZone,
    /// `false` when the camera has stopped producing usable frames.
    pub vision_ok: bool,
    #[serde(skip)]
    pub published_at: Instant,
    pub published_wall: DateTime<Utc>,
}

impl DetectorSnapshot {
    /// The state before the first perception cycle: no valid verdict.
    pub fn initial(decay_window: Duration) -> Self {
        Self {
            version: 0,
            mode: OperatingMode::Normal,
            stabilized: StabilizedVerdict::unknown(decay_window),
            gap: GapTarget::inactive(),
            range: None,
            range_zone: RangeZone::Unavailable,
            vision_ok: false,
            published_at: Instant::now(),
            published_wall: Utc::now(),
        }
    }

    /// Whether the vision half of this snapshot can be trusted at `now`.
    pub fn vision_fresh(&self, now: Instant, max_age: Duration) -> bool {
        self.version > 0
            && self.vision_ok
            && now.saturating_duration_since(self.published_at) <= max_age
    }
}

/// A single motion command from the UI or the autonomous agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MotionRequest {
    pub direction: Direction,
    #[serde(default)]
    pub mode: OperatingMode,
    /// Metres for linear moves, degrees for turns. Ignored for `stop`.
    #[serde(default)]
    pub magnitude: f32,
}

impl MotionRequest {
    pub fn new(direction: Direction, mode: OperatingMode, magnitude: f32) -> Self {
        Self {
            direction,
            mode,
            magnitude,
        }
    }

    pub fn stop() -> Self {
        Self::new(Direction::Stop, OperatingMode::Normal, 0.0)
    }

    /// Drive speed handed to the actuation sink: m/s or deg/s.
    pub fn speed(&self) -> f32 {
        let base = if self.direction.is_turn() {
            TURN_SPEED_DPS
        } else {
            LINEAR_SPEED_MPS
        };
        base * self.mode.speed_factor()
    }

    /// Commanded duration derived from magnitude and speed.
    pub fn duration(&self) -> Duration {
        if self.direction == Direction::Stop || !self.magnitude.is_finite() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f32(self.magnitude.abs() / self.speed()).unwrap_or(Duration::MAX)
    }
}

/// Why the gate refused a request before it started.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "details", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("two consecutive backward moves are not allowed")]
    ConsecutiveBackward,
    #[error("another motion is still in progress")]
    MotionInProgress,
    #[error("no valid vision verdict is available")]
    VisionUnavailable,
    #[error("range sensor reports an obstacle inside the stop distance")]
    RangeStop,
    #[error("forward path is blocked")]
    ForwardBlocked,
    /// The published verdict was computed for a more permissive mode than
    /// the request asks for.
    #[error("vision verdict was computed in {published} mode, not {requested}")]
    ModeMismatch {
        requested: OperatingMode,
        published: OperatingMode,
    },
    #[error("magnitude must be finite and within the maximum motion duration")]
    InvalidMagnitude,
    #[error("actuator fault: {0}")]
    ActuatorFault(String),
}

/// Why a reflex session ended a motion early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripReason {
    ObstacleDetected,
    RangeStop,
    VisionUnavailable,
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TripReason::ObstacleDetected => "obstacle detected",
            TripReason::RangeStop => "range sensor stop zone",
            TripReason::VisionUnavailable => "vision unavailable",
        };
        f.write_str(text)
    }
}

/// Final result of a submitted [`MotionRequest`].
///
/// "Stopped early" is deliberately distinct from both "completed" and
/// "rejected before starting".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MotionOutcome {
    Completed { direction: Direction, elapsed_ms: u64 },
    StoppedEarly {
        direction: Direction,
        reason: TripReason,
        elapsed_ms: u64,
    },
    /// Acknowledgement of an explicit stop request, or of a motion cut short
    /// by one.
    Stopped { direction: Direction },
    Rejected {
        direction: Direction,
        reason: RejectReason,
    },
}

impl MotionOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, MotionOutcome::Rejected { .. })
    }
}

/// Error taxonomy shared by every CrewSafe crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SafetyError {
    #[error("Sensor unavailable: {sensor}: {details}")]
    SensorUnavailable { sensor: String, details: String },

    #[error("Stale data from {sensor}: {age_ms} ms old")]
    StaleData { sensor: String, age_ms: u64 },

    #[error("Corrupt frame: {0}")]
    CorruptFrame(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(RejectReason),

    #[error("Actuation fault on {component}: {details}")]
    Actuation { component: String, details: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Envelope for everything routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"crewsafe-kernel::gate"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    ModeChanged(OperatingMode),
    MotionAccepted(MotionRequest),
    MotionFinished(MotionOutcome),
    ReflexTrip {
        direction: Direction,
        reason: TripReason,
    },
    SensorFault {
        component: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_serializes_snake_case() {
        let json = serde_json::to_string(&Direction::StrafeLeft).unwrap();
        assert_eq!(json, "\"strafe_left\"");
        let back: Direction = serde_json::from_str("\"backward\"").unwrap();
        assert_eq!(back, Direction::Backward);
    }

    #[test]
    fn motion_request_defaults_mode_and_magnitude() {
        let req: MotionRequest = serde_json::from_str(r#"{"direction":"stop"}"#).unwrap();
        assert_eq!(req.mode, OperatingMode::Normal);
        assert_eq!(req.duration(), Duration::ZERO);
    }

    #[test]
    fn linear_duration_uses_nominal_speed() {
        let req = MotionRequest::new(Direction::Forward, OperatingMode::Normal, 0.3);
        assert_eq!(req.duration().as_millis(), 2000);
    }

    #[test]
    fn approach_mode_halves_speed() {
        let req = MotionRequest::new(Direction::Forward, OperatingMode::Approach, 0.3);
        assert_eq!(req.duration().as_millis(), 4000);
        assert!((req.speed() - 0.075).abs() < 1e-6);
    }

    #[test]
    fn turn_duration_uses_degrees() {
        let req = MotionRequest::new(Direction::Left, OperatingMode::Normal, 90.0);
        assert_eq!(req.duration().as_millis(), 1500);
    }

    #[test]
    fn non_finite_magnitude_has_zero_duration() {
        let req = MotionRequest::new(Direction::Forward, OperatingMode::Normal, f32::NAN);
        assert_eq!(req.duration(), Duration::ZERO);
    }

    #[test]
    fn stale_range_sample_is_not_ok() {
        let t0 = Instant::now();
        let sample = RangeSample::ok(55.0, t0);
        let later = t0 + Duration::from_millis(400);
        assert!(sample.effective(t0, Duration::from_millis(250)).sensor_ok);
        assert!(!sample.effective(later, Duration::from_millis(250)).sensor_ok);
    }

    #[test]
    fn initial_snapshot_has_no_fresh_vision() {
        let snap = DetectorSnapshot::initial(Duration::from_millis(500));
        assert!(snap.stabilized.blocked);
        assert!(!snap.vision_fresh(Instant::now(), Duration::from_secs(10)));
    }

    #[test]
    fn operating_mode_parses_case_insensitively() {
        assert_eq!("Precision".parse::<OperatingMode>().unwrap(), OperatingMode::Precision);
        assert!("turbo".parse::<OperatingMode>().is_err());
    }

    #[test]
    fn motion_outcome_roundtrip() {
        let outcome = MotionOutcome::Rejected {
            direction: Direction::Backward,
            reason: RejectReason::ConsecutiveBackward,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("consecutive_backward"));
        let back: MotionOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
        assert!(!back.is_accepted());
    }

    #[test]
    fn motion_request_schema_lists_directions() {
        let schema = schemars::schema_for!(MotionRequest);
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("strafe_right"));
        assert!(json.contains("magnitude"));
    }

    #[test]
    fn safety_error_display() {
        let err = SafetyError::StaleData {
            sensor: "tof_front".to_string(),
            age_ms: 900,
        };
        assert!(err.to_string().contains("tof_front"));
        let err2 = SafetyError::InvalidRequest(RejectReason::RangeStop);
        assert!(err2.to_string().contains("stop distance"));
    }

    #[test]
    fn event_payload_roundtrip() {
        let event = Event::new(
            "crewsafe-kernel::reflex",
            EventPayload::ReflexTrip {
                direction: Direction::Forward,
                reason: TripReason::ObstacleDetected,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert!(matches!(back.payload, EventPayload::ReflexTrip { .. }));
    }
}
