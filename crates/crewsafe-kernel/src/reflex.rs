//! [`ReflexMonitor`] – in-motion safety supervisor.
//!
//! One reflex session runs per accepted motion.  It ticks at a fixed poll
//! rate for the commanded duration, re-reading the [`SharedDetectorState`]
//! each tick.  For forward motion, a blocked stabilized verdict, a range
//! stop zone, or stale/unavailable vision trips the reflex: the drive is
//! stopped on the spot, a [`EventPayload::ReflexTrip`] is published, and the
//! session ends.  Worst-case reaction is one poll interval plus actuation
//! latency, independent of the commanded duration.
//!
//! Sessions end early when their [`CancellationToken`] is cancelled (an
//! explicit stop request).

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crewsafe_hal::DriveSink;
use crewsafe_middleware::{EventBus, Topic};
use crewsafe_types::{
    DetectorSnapshot, Direction, Event, EventPayload, MotionRequest, RejectReason, SafetyError,
    TripReason,
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::motion_gate::GateConfig;
use crate::policy::{
    ForwardClearance, GateContext, MotionPolicy, RangeStopOverride, VisionAvailable,
};
use crate::shared_state::SharedDetectorState;

const SOURCE: &str = "crewsafe-kernel::reflex";

/// How a reflex session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflexOutcome {
    /// The commanded duration elapsed without incident.
    Completed,
    /// The drive was stopped because the path closed.
    Tripped(TripReason),
    /// The session was cancelled from outside.
    Cancelled,
}

pub struct ReflexMonitor {
    poll_interval: Duration,
    trip_rules: MotionPolicy,
    bus: EventBus,
}

impl ReflexMonitor {
    pub fn new(config: &GateConfig, bus: EventBus) -> Self {
        let mut trip_rules = MotionPolicy::new();
        trip_rules.add_rule(Box::new(VisionAvailable {
            max_age: config.vision_max_age,
        }));
        trip_rules.add_rule(Box::new(RangeStopOverride {
            stop_cm: config.range_stop_cm,
            approach_stop_cm: config.approach_stop_cm,
            max_age: config.range_max_age,
        }));
        trip_rules.add_rule(Box::new(ForwardClearance));
        Self {
            poll_interval: config.poll_interval(),
            trip_rules,
            bus,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether `request` must be stopped given `snapshot` at `now`.
    pub fn evaluate(
        &self,
        request: &MotionRequest,
        snapshot: &DetectorSnapshot,
        now: Instant,
    ) -> Option<TripReason> {
        if request.direction != Direction::Forward {
            return None;
        }
        let ctx = GateContext {
            request,
            snapshot,
            last_direction: None,
            motion_in_progress: false,
            now,
        };
        match self.trip_rules.verify(&ctx) {
            Ok(()) => None,
            Err(SafetyError::InvalidRequest(
                RejectReason::VisionUnavailable | RejectReason::ModeMismatch { .. },
            )) => Some(TripReason::VisionUnavailable),
            Err(SafetyError::InvalidRequest(RejectReason::RangeStop)) => Some(TripReason::RangeStop),
            Err(_) => Some(TripReason::ObstacleDetected),
        }
    }

    /// Supervise `request` for `duration`.
    ///
    /// The first check happens immediately, then once per poll interval.
    pub async fn run(
        &self,
        request: &MotionRequest,
        duration: Duration,
        state: &SharedDetectorState,
        drive: &Arc<Mutex<Box<dyn DriveSink>>>,
        cancel: &CancellationToken,
    ) -> ReflexOutcome {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(direction = %request.direction, "reflex session cancelled");
                    return ReflexOutcome::Cancelled;
                }
                _ = &mut deadline => return ReflexOutcome::Completed,
                _ = ticker.tick() => {
                    let snapshot = state.snapshot();
                    if let Some(reason) = self.evaluate(request, &snapshot, Instant::now()) {
                        self.trip(request.direction, reason, drive);
                        cancel.cancel();
                        return ReflexOutcome::Tripped(reason);
                    }
                }
            }
        }
    }

    fn trip(&self, direction: Direction, reason: TripReason, drive: &Arc<Mutex<Box<dyn DriveSink>>>) {
        let stopped = drive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
        if let Err(e) = stopped {
            error!(error = %e, "reflex stop command failed");
        }
        warn!(%direction, %reason, "safety reflex tripped");
        self.bus.emit(
            Topic::SafetyAlerts,
            Event::new(SOURCE, EventPayload::ReflexTrip { direction, reason }),
        );
    }
}
