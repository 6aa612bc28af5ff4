//! [`SafetyCore`] – the facade the UI endpoint, the CLI and the autonomous
//! agent talk to.
//!
//! It owns the [`SharedDetectorState`], the [`MotionGate`] and, when started
//! with hardware, the perception thread.  Everything it exposes is either a
//! read of the latest snapshot or a call into the gate, so the UI and the
//! agent are held to exactly the same rules.
//!
//! # Example
//!
//! ```rust
//! use crewsafe_hal::sim::SimDrive;
//! use crewsafe_middleware::EventBus;
//! use crewsafe_runtime::{CoreConfig, SafetyCore};
//! use crewsafe_types::OperatingMode;
//!
//! let core = SafetyCore::new(&CoreConfig::default(), Box::new(SimDrive::new("wheel_base")), EventBus::default());
//! assert_eq!(core.status().version, 0);
//! core.set_mode(OperatingMode::Precision);
//! assert_eq!(core.status().mode, OperatingMode::Precision);
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crewsafe_hal::{Camera, DriveSink, RangeSensor};
use crewsafe_kernel::{GateConfig, MotionGate, SharedDetectorState};
use crewsafe_middleware::{EventBus, Topic};
use crewsafe_perception::{PerceptionConfig, PerceptionPipeline, RangeConfig};
use crewsafe_types::{
    Direction, Event, EventPayload, GapTarget, MotionOutcome, MotionRequest, ObstacleVerdict,
    OperatingMode, RangeZone, SafetyError,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent_context::AgentContext;
use crate::perception_loop::{PerceptionLoop, PerceptionWorker};

const SOURCE: &str = "crewsafe-runtime::core";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoreConfig {
    pub perception: PerceptionConfig,
    pub gate: GateConfig,
    pub frame_rate_hz: f32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            perception: PerceptionConfig::default(),
            gate: GateConfig::default(),
            frame_rate_hz: 30.0,
        }
    }
}

impl CoreConfig {
    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate_hz.is_finite() && self.frame_rate_hz > 0.0 {
            Duration::from_micros((1_000_000.0 / f64::from(self.frame_rate_hz)).round() as u64)
        } else {
            Duration::from_millis(33)
        }
    }
}

/// The devices a running core is wired to.
pub struct Hardware {
    pub camera: Box<dyn Camera>,
    pub range: Option<Box<dyn RangeSensor>>,
    pub drive: Box<dyn DriveSink>,
}

// ────────────────────────────────────────────────────────────────────────────
// Status
// ────────────────────────────────────────────────────────────────────────────

/// Point-in-time view of the safety core, as served to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub version: u64,
    /// Mode requested by the operator or agent.
    pub mode: OperatingMode,
    /// Mode the latest snapshot was computed in.  Lags `mode` by at most
    /// one perception cycle.
    pub applied_mode: OperatingMode,
    pub blocked: bool,
    pub raw_blocked: bool,
    pub verdict: ObstacleVerdict,
    pub gap: GapTarget,
    /// Latest smoothed range reading; `None` when the sensor is absent,
    /// failed or stale.
    pub range_cm: Option<f32>,
    pub range_zone: RangeZone,
    /// Fresh and valid vision.
    pub vision_ok: bool,
    pub snapshot_age_ms: u64,
    pub active_motion: Option<Direction>,
    pub last_motion: Option<Direction>,
    pub published_at: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyCore
// ────────────────────────────────────────────────────────────────────────────

pub struct SafetyCore {
    state: SharedDetectorState,
    gate: Arc<MotionGate>,
    bus: EventBus,
    vision_max_age: Duration,
    range: RangeConfig,
    perception: Mutex<Option<PerceptionLoop>>,
}

impl SafetyCore {
    /// A core without a perception thread.  Snapshots must be published on
    /// [`state`][Self::state] by the caller.
    pub fn new(config: &CoreConfig, drive: Box<dyn DriveSink>, bus: EventBus) -> Self {
        let state = SharedDetectorState::new(config.perception.decay_window);
        let gate = MotionGate::new(config.gate, state.clone(), drive, bus.clone());
        Self {
            state,
            gate: Arc::new(gate),
            bus,
            vision_max_age: config.gate.vision_max_age,
            range: config.perception.range,
            perception: Mutex::new(None),
        }
    }

    /// Wire up `hardware` and start the perception thread.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::Config`] when the perception thread cannot be
    /// spawned.
    pub fn start(config: &CoreConfig, hardware: Hardware, bus: EventBus) -> Result<Self, SafetyError> {
        let core = Self::new(config, hardware.drive, bus);
        let worker = PerceptionWorker::new(
            PerceptionPipeline::new(config.perception),
            hardware.camera,
            hardware.range,
            core.state.clone(),
            core.bus.clone(),
        );
        let perception = PerceptionLoop::spawn(worker, config.frame_interval())?;
        *core.perception.lock().unwrap_or_else(PoisonError::into_inner) = Some(perception);
        info!(
            frame_rate_hz = config.frame_rate_hz,
            reflex_poll_ms = config.gate.poll_interval().as_millis() as u64,
            "safety core started"
        );
        Ok(core)
    }

    pub fn state(&self) -> &SharedDetectorState {
        &self.state
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn gate(&self) -> &Arc<MotionGate> {
        &self.gate
    }

    pub fn status(&self) -> StatusReport {
        let snapshot = self.state.snapshot();
        let now = Instant::now();
        let range_cm = snapshot
            .range
            .map(|s| s.effective(now, self.range.max_age))
            .filter(|s| s.sensor_ok)
            .map(|s| s.distance_cm);
        StatusReport {
            version: snapshot.version,
            mode: self.state.mode(),
            applied_mode: snapshot.mode,
            blocked: snapshot.stabilized.blocked,
            raw_blocked: snapshot.stabilized.raw_blocked,
            verdict: snapshot.stabilized.verdict,
            gap: snapshot.gap,
            range_cm,
            range_zone: self.range.classify(snapshot.range.as_ref(), now, snapshot.mode),
            vision_ok: snapshot.vision_fresh(now, self.vision_max_age),
            snapshot_age_ms: now.saturating_duration_since(snapshot.published_at).as_millis() as u64,
            active_motion: self.gate.active_direction(),
            last_motion: self.gate.history().last(),
            published_at: snapshot.published_wall,
        }
    }

    /// Switch operating mode.  Returns the previous mode.
    pub fn set_mode(&self, mode: OperatingMode) -> OperatingMode {
        let previous = self.state.set_mode(mode);
        if previous != mode {
            self.bus.emit(
                Topic::Perception,
                Event::new(SOURCE, EventPayload::ModeChanged(mode)),
            );
        }
        previous
    }

    pub async fn submit(&self, request: MotionRequest) -> MotionOutcome {
        self.gate.submit(request).await
    }

    /// Decision context for the autonomous agent.
    pub fn agent_context(&self) -> AgentContext {
        AgentContext::from_status(&self.status())
    }

    /// Stop the perception thread.  Idempotent.
    pub fn shutdown(&self) {
        if let Some(mut perception) = self
            .perception
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            perception.shutdown();
            info!("safety core stopped");
        }
    }
}

impl Drop for SafetyCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewsafe_hal::DriveCommand;
    use crewsafe_hal::sim::{SimCamera, SimDrive, SimRangeSensor, SimWorld};
    use crewsafe_types::{DetectorSnapshot, RangeSample, RejectReason};

    fn clear_snapshot() -> DetectorSnapshot {
        let mut snap = DetectorSnapshot::initial(Duration::from_millis(500));
        snap.vision_ok = true;
        snap.stabilized.blocked = false;
        snap.stabilized.raw_blocked = false;
        snap.stabilized.verdict = ObstacleVerdict::clear();
        snap
    }

    fn core() -> SafetyCore {
        SafetyCore::new(
            &CoreConfig::default(),
            Box::new(SimDrive::new("wheel_base")),
            EventBus::default(),
        )
    }

    #[test]
    fn status_reflects_latest_snapshot() {
        let core = core();
        let mut snap = clear_snapshot();
        snap.range = Some(RangeSample::ok(55.0, Instant::now()));
        snap.range_zone = RangeZone::Caution;
        core.state().publish(snap);

        let status = core.status();
        assert_eq!(status.version, 1);
        assert!(!status.blocked);
        assert!(status.vision_ok);
        assert_eq!(status.range_cm, Some(55.0));
        assert_eq!(status.range_zone, RangeZone::Caution);
        assert_eq!(status.active_motion, None);
    }

    #[test]
    fn status_before_first_cycle_is_not_ok() {
        let status = core().status();
        assert_eq!(status.version, 0);
        assert!(!status.vision_ok);
        assert!(status.blocked);
    }

    #[test]
    fn failed_range_is_not_reported_as_distance() {
        let core = core();
        let mut snap = clear_snapshot();
        snap.range = Some(RangeSample::failed(Instant::now()));
        core.state().publish(snap);
        assert_eq!(core.status().range_cm, None);
    }

    #[test]
    fn status_serializes_for_the_ui() {
        let core = core();
        core.state().publish(clear_snapshot());
        let json = serde_json::to_value(core.status()).unwrap();
        assert_eq!(json["mode"], "normal");
        assert_eq!(json["blocked"], false);
        assert_eq!(json["range_zone"], "unavailable");
        assert_eq!(json["gap"]["guidance"], "inactive");
    }

    #[test]
    fn status_reclassifies_a_stale_range_sample() {
        let core = core();
        let sampled = Instant::now()
            .checked_sub(Duration::from_millis(300))
            .unwrap();
        let mut snap = clear_snapshot();
        snap.range = Some(RangeSample::ok(20.0, sampled));
        snap.range_zone = RangeZone::Stop;
        core.state().publish(snap);

        let status = core.status();
        assert_eq!(status.range_cm, None);
        assert_eq!(status.range_zone, RangeZone::Unavailable);
    }

    #[tokio::test]
    async fn set_mode_publishes_change_once() {
        let core = core();
        let mut rx = core.bus().subscribe_to(Topic::Perception);
        assert_eq!(core.set_mode(OperatingMode::Approach), OperatingMode::Normal);
        assert_eq!(core.set_mode(OperatingMode::Approach), OperatingMode::Approach);

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            EventPayload::ModeChanged(OperatingMode::Approach)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_goes_through_the_gate() {
        let core = core();
        let outcome = core
            .submit(MotionRequest::new(Direction::Forward, OperatingMode::Normal, 0.3))
            .await;
        assert_eq!(
            outcome,
            MotionOutcome::Rejected {
                direction: Direction::Forward,
                reason: RejectReason::VisionUnavailable
            }
        );

        assert!(
            core.submit(MotionRequest::new(Direction::Backward, OperatingMode::Normal, 0.15))
                .await
                .is_accepted()
        );
        assert_eq!(core.status().last_motion, Some(Direction::Backward));
    }

    #[test]
    fn started_core_publishes_from_hardware() {
        let world = SimWorld::new(160, 120);
        world.place_obstacle(40, 120, 110, 119);
        world.set_range(Some(150.0));
        let drive = SimDrive::new("wheel_base");
        let log = drive.log();
        let hardware = Hardware {
            camera: Box::new(SimCamera::new("front", world.clone())),
            range: Some(Box::new(SimRangeSensor::new("tof_front", world.clone()))),
            drive: Box::new(drive),
        };
        let config = CoreConfig {
            frame_rate_hz: 200.0,
            ..CoreConfig::default()
        };
        let core = SafetyCore::start(&config, hardware, EventBus::default()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while core.status().version < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let status = core.status();
        assert!(status.version >= 2);
        assert!(status.blocked);
        assert_eq!(status.range_zone, RangeZone::Clear);

        core.shutdown();
        core.shutdown();
        assert!(log.lock().unwrap().iter().all(|c| *c == DriveCommand::Stop));
    }

    #[test]
    fn frame_interval_guards_bad_rate() {
        let config = CoreConfig {
            frame_rate_hz: 0.0,
            ..CoreConfig::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(33));
        assert_eq!(
            CoreConfig::default().frame_interval(),
            Duration::from_micros(33_333)
        );
    }
}
