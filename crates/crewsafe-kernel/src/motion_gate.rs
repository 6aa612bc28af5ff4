//! [`MotionGate`] – the single interception point between motion requests
//! and the drive.
//!
//! Every [`MotionRequest`], whether from the operator UI or the autonomous
//! agent, goes through [`MotionGate::submit`]:
//!
//! 1. `STOP` cancels any in-flight reflex session and stops the drive before
//!    it is acknowledged.  It never touches the motion history.
//! 2. Any other request is checked against the [`MotionPolicy`] using the
//!    latest [`DetectorSnapshot`][crewsafe_types::DetectorSnapshot].  The
//!    first violated rule rejects it with a reason code; nothing is queued.
//! 3. An admitted request is dispatched to the [`DriveSink`] and supervised
//!    by a [`ReflexMonitor`] session for its commanded duration, after which
//!    the drive is stopped and the motion history updated.
//!
//! Every decision is published on the event bus and returned as an explicit
//! [`MotionOutcome`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crewsafe_hal::DriveSink;
use crewsafe_middleware::{EventBus, Topic};
use crewsafe_types::{
    Direction, Event, EventPayload, MotionOutcome, MotionRequest, RejectReason, SafetyError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::policy::{GateContext, MotionPolicy};
use crate::reflex::{ReflexMonitor, ReflexOutcome};
use crate::shared_state::SharedDetectorState;

const SOURCE: &str = "crewsafe-kernel::gate";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables shared by the gate's rules and its reflex sessions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// Longest single motion the gate will accept.
    pub max_motion_duration: Duration,
    /// Snapshots older than this do not count as valid vision.
    pub vision_max_age: Duration,
    pub range_stop_cm: f32,
    pub approach_stop_cm: f32,
    pub range_max_age: Duration,
    /// Reflex poll rate: 10 Hz vision-only, 20 Hz with a range sensor.
    pub reflex_poll_hz: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_motion_duration: Duration::from_secs(30),
            vision_max_age: Duration::from_millis(500),
            range_stop_cm: 30.0,
            approach_stop_cm: 10.0,
            range_max_age: Duration::from_millis(250),
            reflex_poll_hz: 10.0,
        }
    }
}

impl GateConfig {
    pub fn poll_interval(&self) -> Duration {
        let hz = if self.reflex_poll_hz.is_finite() && self.reflex_poll_hz > 0.0 {
            self.reflex_poll_hz
        } else {
            10.0
        };
        Duration::from_micros((1_000_000.0 / f64::from(hz)).round() as u64)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motion history
// ────────────────────────────────────────────────────────────────────────────

/// Last executed direction; a single value, never a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionHistory {
    last: Option<Direction>,
}

impl MotionHistory {
    pub fn last(&self) -> Option<Direction> {
        self.last
    }

    pub fn record(&mut self, direction: Direction) {
        self.last = Some(direction);
    }
}

struct ActiveMotion {
    id: u64,
    direction: Direction,
    cancel: CancellationToken,
}

#[derive(Default)]
struct GateState {
    history: MotionHistory,
    active: Option<ActiveMotion>,
    next_id: u64,
}

// ────────────────────────────────────────────────────────────────────────────
// MotionGate
// ────────────────────────────────────────────────────────────────────────────

/// Admission control and supervision for every motion.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct MotionGate {
    state: SharedDetectorState,
    policy: MotionPolicy,
    reflex: ReflexMonitor,
    drive: Arc<Mutex<Box<dyn DriveSink>>>,
    gate: Mutex<GateState>,
    bus: EventBus,
}

impl MotionGate {
    /// A gate with the standard rule set.
    pub fn new(
        config: GateConfig,
        state: SharedDetectorState,
        drive: Box<dyn DriveSink>,
        bus: EventBus,
    ) -> Self {
        Self::with_policy(config, MotionPolicy::standard(&config), state, drive, bus)
    }

    pub fn with_policy(
        config: GateConfig,
        policy: MotionPolicy,
        state: SharedDetectorState,
        drive: Box<dyn DriveSink>,
        bus: EventBus,
    ) -> Self {
        Self {
            reflex: ReflexMonitor::new(&config, bus.clone()),
            state,
            policy,
            drive: Arc::new(Mutex::new(drive)),
            gate: Mutex::new(GateState::default()),
            bus,
        }
    }

    fn gate(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn history(&self) -> MotionHistory {
        self.gate().history
    }

    /// Direction of the motion currently executing, if any.
    pub fn active_direction(&self) -> Option<Direction> {
        self.gate().active.as_ref().map(|a| a.direction)
    }

    /// Dry-run the policy without dispatching anything.
    pub fn evaluate(&self, request: &MotionRequest) -> Result<(), RejectReason> {
        if request.direction == Direction::Stop {
            return Ok(());
        }
        let snapshot = self.state.snapshot();
        let gate = self.gate();
        let ctx = GateContext {
            request,
            snapshot: &snapshot,
            last_direction: gate.history.last(),
            motion_in_progress: gate.active.is_some(),
            now: Instant::now(),
        };
        self.policy.verify(&ctx).map_err(reject_reason)
    }

    /// Submit a request and wait for its final outcome.
    pub async fn submit(&self, request: MotionRequest) -> MotionOutcome {
        if request.direction == Direction::Stop {
            return self.stop();
        }

        let (id, cancel) = match self.admit(&request) {
            Ok(admitted) => admitted,
            Err(reason) => return self.rejected(request.direction, reason),
        };

        let duration = request.duration();
        info!(
            direction = %request.direction,
            mode = %request.mode,
            magnitude = request.magnitude,
            duration_ms = duration.as_millis() as u64,
            "motion accepted"
        );
        self.bus.emit(
            Topic::Motion,
            Event::new(SOURCE, EventPayload::MotionAccepted(request)),
        );

        let started = tokio::time::Instant::now();
        let reflex = self
            .reflex
            .run(&request, duration, &self.state, &self.drive, &cancel)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match reflex {
            ReflexOutcome::Completed => {
                if let Err(e) = self.stop_drive() {
                    error!(error = %e, "failed to stop drive after motion");
                }
                MotionOutcome::Completed {
                    direction: request.direction,
                    elapsed_ms,
                }
            }
            ReflexOutcome::Tripped(reason) => MotionOutcome::StoppedEarly {
                direction: request.direction,
                reason,
                elapsed_ms,
            },
            ReflexOutcome::Cancelled => MotionOutcome::Stopped {
                direction: request.direction,
            },
        };

        {
            let mut gate = self.gate();
            gate.history.record(request.direction);
            if gate.active.as_ref().is_some_and(|a| a.id == id) {
                gate.active = None;
            }
        }

        info!(?outcome, "motion finished");
        self.bus.emit(
            Topic::Motion,
            Event::new(SOURCE, EventPayload::MotionFinished(outcome.clone())),
        );
        outcome
    }

    /// Check the policy and, if it passes, register the motion and start
    /// the drive.  The gate lock is held across the check and registration
    /// so two concurrent requests cannot both be admitted.
    fn admit(&self, request: &MotionRequest) -> Result<(u64, CancellationToken), RejectReason> {
        let snapshot = self.state.snapshot();
        let (id, cancel) = {
            let mut gate = self.gate();
            let ctx = GateContext {
                request,
                snapshot: &snapshot,
                last_direction: gate.history.last(),
                motion_in_progress: gate.active.is_some(),
                now: Instant::now(),
            };
            self.policy.verify(&ctx).map_err(reject_reason)?;

            gate.next_id += 1;
            let id = gate.next_id;
            let cancel = CancellationToken::new();
            gate.active = Some(ActiveMotion {
                id,
                direction: request.direction,
                cancel: cancel.clone(),
            });
            (id, cancel)
        };

        // stop() cancels before it takes the drive lock, so a cancelled token
        // seen here means the halt has run or is waiting on this lock.
        let dispatched = {
            let mut drive = self.drive.lock().unwrap_or_else(PoisonError::into_inner);
            if cancel.is_cancelled() {
                debug!(direction = %request.direction, "stopped before dispatch");
                Ok(())
            } else {
                drive.drive(request.direction, request.speed())
            }
        };

        if let Err(e) = dispatched {
            error!(error = %e, direction = %request.direction, "drive dispatch failed");
            if let Err(stop_err) = self.stop_drive() {
                error!(error = %stop_err, "failed to stop drive after dispatch fault");
            }
            let mut gate = self.gate();
            if gate.active.as_ref().is_some_and(|a| a.id == id) {
                gate.active = None;
            }
            return Err(RejectReason::ActuatorFault(e.to_string()));
        }
        Ok((id, cancel))
    }

    /// Cancel whatever is running and halt the drive.
    fn stop(&self) -> MotionOutcome {
        let interrupted = {
            let mut gate = self.gate();
            let active = gate.active.take();
            if let Some(active) = &active {
                active.cancel.cancel();
            }
            active
        };

        match self.stop_drive() {
            Ok(()) => {
                info!(
                    interrupted = ?interrupted.as_ref().map(|a| a.direction),
                    "stop acknowledged"
                );
                let outcome = MotionOutcome::Stopped {
                    direction: Direction::Stop,
                };
                self.bus.emit(
                    Topic::Motion,
                    Event::new(SOURCE, EventPayload::MotionFinished(outcome.clone())),
                );
                outcome
            }
            Err(e) => {
                error!(error = %e, "stop command failed");
                self.rejected(Direction::Stop, RejectReason::ActuatorFault(e.to_string()))
            }
        }
    }

    fn stop_drive(&self) -> Result<(), SafetyError> {
        self.drive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop()
    }

    fn rejected(&self, direction: Direction, reason: RejectReason) -> MotionOutcome {
        warn!(%direction, %reason, "motion rejected");
        let outcome = MotionOutcome::Rejected { direction, reason };
        self.bus.emit(
            Topic::SafetyAlerts,
            Event::new(SOURCE, EventPayload::MotionFinished(outcome.clone())),
        );
        outcome
    }
}

fn reject_reason(err: SafetyError) -> RejectReason {
    match err {
        SafetyError::InvalidRequest(reason) => reason,
        other => RejectReason::ActuatorFault(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewsafe_hal::DriveCommand;
    use crewsafe_hal::sim::SimDrive;
    use crewsafe_types::{
        DetectorSnapshot, ObstacleVerdict, OperatingMode, RangeSample, RangeZone, TripReason,
    };

    struct Fixture {
        gate: Arc<MotionGate>,
        state: SharedDetectorState,
        log: Arc<Mutex<Vec<DriveCommand>>>,
        bus: EventBus,
    }

    fn fixture_with(drive: SimDrive) -> Fixture {
        let state = SharedDetectorState::new(Duration::from_millis(500));
        let bus = EventBus::default();
        let log = drive.log();
        let gate = Arc::new(MotionGate::new(
            GateConfig::default(),
            state.clone(),
            Box::new(drive),
            bus.clone(),
        ));
        Fixture {
            gate,
            state,
            log,
            bus,
        }
    }

    fn fixture() -> Fixture {
        let f = fixture_with(SimDrive::new("wheel_base"));
        f.state.publish(clear());
        f
    }

    fn clear() -> DetectorSnapshot {
        let mut snap = DetectorSnapshot::initial(Duration::from_millis(500));
        snap.vision_ok = true;
        snap.stabilized.blocked = false;
        snap.stabilized.verdict = ObstacleVerdict::clear();
        snap
    }

    fn blocked() -> DetectorSnapshot {
        let mut snap = clear();
        snap.stabilized.blocked = true;
        snap.stabilized.verdict = ObstacleVerdict::unknown_unsafe();
        snap
    }

    fn req(direction: Direction, magnitude: f32) -> MotionRequest {
        MotionRequest::new(direction, OperatingMode::Normal, magnitude)
    }

    fn commands(f: &Fixture) -> Vec<DriveCommand> {
        f.log.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn clear_forward_completes_and_stops_drive() {
        let f = fixture();
        let outcome = f.gate.submit(req(Direction::Forward, 0.15)).await;
        assert!(matches!(
            outcome,
            MotionOutcome::Completed {
                direction: Direction::Forward,
                elapsed_ms: 1000..=1100
            }
        ));
        assert_eq!(
            commands(&f),
            vec![
                DriveCommand::Drive {
                    direction: Direction::Forward,
                    speed: 0.15
                },
                DriveCommand::Stop
            ]
        );
        assert_eq!(f.gate.history().last(), Some(Direction::Forward));
        assert_eq!(f.gate.active_direction(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_backward_is_rejected_without_moving() {
        let f = fixture();
        assert!(f.gate.submit(req(Direction::Backward, 0.15)).await.is_accepted());
        let before = commands(&f).len();

        let outcome = f.gate.submit(req(Direction::Backward, 0.15)).await;
        assert_eq!(
            outcome,
            MotionOutcome::Rejected {
                direction: Direction::Backward,
                reason: RejectReason::ConsecutiveBackward
            }
        );
        assert_eq!(commands(&f).len(), before);

        // Any other move clears the way for another backward.
        assert!(f.gate.submit(req(Direction::Left, 30.0)).await.is_accepted());
        assert!(f.gate.submit(req(Direction::Backward, 0.15)).await.is_accepted());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_does_not_reset_backward_history() {
        let f = fixture();
        f.gate.submit(req(Direction::Backward, 0.15)).await;
        assert!(matches!(
            f.gate.submit(MotionRequest::stop()).await,
            MotionOutcome::Stopped { .. }
        ));
        assert_eq!(
            f.gate.evaluate(&req(Direction::Backward, 0.15)),
            Err(RejectReason::ConsecutiveBackward)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_forward_is_rejected() {
        let f = fixture();
        f.state.publish(blocked());
        let outcome = f.gate.submit(req(Direction::Forward, 0.3)).await;
        assert_eq!(
            outcome,
            MotionOutcome::Rejected {
                direction: Direction::Forward,
                reason: RejectReason::ForwardBlocked
            }
        );
        assert!(commands(&f).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forward_before_first_frame_is_rejected() {
        let f = fixture_with(SimDrive::new("wheel_base"));
        let outcome = f.gate.submit(req(Direction::Forward, 0.3)).await;
        assert_eq!(
            outcome,
            MotionOutcome::Rejected {
                direction: Direction::Forward,
                reason: RejectReason::VisionUnavailable
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn range_stop_rejects_forward_despite_clear_vision() {
        let f = fixture();
        let mut snap = clear();
        snap.range = Some(RangeSample::ok(22.0, Instant::now()));
        snap.range_zone = RangeZone::Stop;
        f.state.publish(snap);
        let outcome = f.gate.submit(req(Direction::Forward, 0.3)).await;
        assert_eq!(
            outcome,
            MotionOutcome::Rejected {
                direction: Direction::Forward,
                reason: RejectReason::RangeStop
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_request_is_rejected_not_queued() {
        let f = fixture();
        let gate = Arc::clone(&f.gate);
        let running = tokio::spawn(async move { gate.submit(req(Direction::Left, 90.0)).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.gate.active_direction(), Some(Direction::Left));
        let outcome = f.gate.submit(req(Direction::Right, 30.0)).await;
        assert_eq!(
            outcome,
            MotionOutcome::Rejected {
                direction: Direction::Right,
                reason: RejectReason::MotionInProgress
            }
        );
        assert!(matches!(running.await.unwrap(), MotionOutcome::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_running_motion() {
        let f = fixture();
        let gate = Arc::clone(&f.gate);
        let running = tokio::spawn(async move { gate.submit(req(Direction::Forward, 1.5)).await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let ack = f.gate.submit(MotionRequest::stop()).await;
        assert_eq!(
            ack,
            MotionOutcome::Stopped {
                direction: Direction::Stop
            }
        );
        assert_eq!(commands(&f).last(), Some(&DriveCommand::Stop));
        assert_eq!(f.gate.active_direction(), None);

        assert_eq!(
            running.await.unwrap(),
            MotionOutcome::Stopped {
                direction: Direction::Forward
            }
        );
        assert_eq!(f.gate.history().last(), Some(Direction::Forward));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_before_dispatch_leaves_drive_halted() {
        let f = fixture();
        let held = f.gate.drive.lock().unwrap();

        let gate = Arc::clone(&f.gate);
        let running = tokio::spawn(async move { gate.submit(req(Direction::Forward, 1.5)).await });
        while f.gate.active_direction() != Some(Direction::Forward) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let gate = Arc::clone(&f.gate);
        let stopping = tokio::spawn(async move { gate.submit(MotionRequest::stop()).await });
        while f.gate.active_direction().is_some() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(held);

        assert_eq!(
            stopping.await.unwrap(),
            MotionOutcome::Stopped {
                direction: Direction::Stop
            }
        );
        assert_eq!(
            running.await.unwrap(),
            MotionOutcome::Stopped {
                direction: Direction::Forward
            }
        );
        let log = commands(&f);
        assert!(
            !log.iter().any(|c| matches!(c, DriveCommand::Drive { .. })),
            "drive started after stop: {log:?}"
        );
        assert_eq!(log.last(), Some(&DriveCommand::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn reflex_trip_is_reported_as_stopped_early() {
        let f = fixture();
        let mut alerts = f.bus.subscribe_to(Topic::SafetyAlerts);
        let gate = Arc::clone(&f.gate);
        let running = tokio::spawn(async move { gate.submit(req(Direction::Forward, 0.6)).await });

        tokio::time::sleep(Duration::from_millis(450)).await;
        f.state.publish(blocked());

        let outcome = running.await.unwrap();
        match outcome {
            MotionOutcome::StoppedEarly {
                direction,
                reason,
                elapsed_ms,
            } => {
                assert_eq!(direction, Direction::Forward);
                assert_eq!(reason, TripReason::ObstacleDetected);
                assert!(elapsed_ms <= 550, "elapsed {elapsed_ms}");
            }
            other => panic!("expected StoppedEarly, got {other:?}"),
        }
        assert!(matches!(
            alerts.recv().await.unwrap().payload,
            EventPayload::ReflexTrip { .. }
        ));
        assert_eq!(f.gate.history().last(), Some(Direction::Forward));
    }

    #[tokio::test(start_paused = true)]
    async fn actuator_fault_is_rejected_and_stopped() {
        let f = fixture_with(SimDrive::faulty("wheel_base"));
        f.state.publish(clear());
        let outcome = f.gate.submit(req(Direction::Left, 45.0)).await;
        assert!(matches!(
            outcome,
            MotionOutcome::Rejected {
                reason: RejectReason::ActuatorFault(_),
                ..
            }
        ));
        assert_eq!(commands(&f), vec![DriveCommand::Stop]);
        assert_eq!(f.gate.history().last(), None);
        assert_eq!(f.gate.active_direction(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn decisions_are_published() {
        let f = fixture();
        let mut motion = f.bus.subscribe_to(Topic::Motion);
        f.gate.submit(req(Direction::StrafeLeft, 0.15)).await;
        assert!(matches!(
            motion.recv().await.unwrap().payload,
            EventPayload::MotionAccepted(_)
        ));
        assert!(matches!(
            motion.recv().await.unwrap().payload,
            EventPayload::MotionFinished(MotionOutcome::Completed { .. })
        ));
    }

    #[test]
    fn poll_interval_falls_back_on_bad_rate() {
        let cfg = GateConfig {
            reflex_poll_hz: 0.0,
            ..GateConfig::default()
        };
        assert_eq!(cfg.poll_interval(), Duration::from_millis(100));
    }
}
