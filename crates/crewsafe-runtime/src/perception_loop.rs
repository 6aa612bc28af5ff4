//! The dedicated perception thread.
//!
//! [`PerceptionWorker`] runs one capture, analyse and publish cycle per call
//! to [`step`][PerceptionWorker::step].  [`PerceptionLoop`] drives a worker
//! on a named std thread at the configured frame rate until shut down.
//!
//! The thread only writes [`SharedDetectorState`]; it never talks to the
//! drive.  Camera and range outages are reported once on
//! [`Topic::Perception`] as [`EventPayload::SensorFault`] and once more in the
//! log when they clear.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crewsafe_hal::{Camera, RangeSensor};
use crewsafe_kernel::SharedDetectorState;
use crewsafe_middleware::{EventBus, Topic};
use crewsafe_perception::PerceptionPipeline;
use crewsafe_types::{DetectorSnapshot, Event, EventPayload, SafetyError};
use tracing::{debug, error, info, warn};

const SOURCE: &str = "crewsafe-runtime::perception";

/// Owns the pipeline and the sensors for one perception thread.
pub struct PerceptionWorker {
    pipeline: PerceptionPipeline,
    camera: Box<dyn Camera>,
    range: Option<Box<dyn RangeSensor>>,
    state: SharedDetectorState,
    bus: EventBus,
    camera_fault_reported: bool,
    range_fault_reported: bool,
}

impl PerceptionWorker {
    pub fn new(
        pipeline: PerceptionPipeline,
        camera: Box<dyn Camera>,
        range: Option<Box<dyn RangeSensor>>,
        state: SharedDetectorState,
        bus: EventBus,
    ) -> Self {
        Self {
            pipeline,
            camera,
            range,
            state,
            bus,
            camera_fault_reported: false,
            range_fault_reported: false,
        }
    }

    /// Run one full cycle and publish it.  Returns the published version.
    pub fn step(&mut self) -> u64 {
        let mode = self.state.mode();
        let frame = self.camera.capture();
        let camera_error = frame.as_ref().err().map(SafetyError::to_string);
        let range = self.range.as_mut().map(|sensor| sensor.read_cm());
        let range_error = match &range {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        };

        let snapshot = self.pipeline.process(frame, range, mode, Instant::now());
        self.report_camera(&snapshot, camera_error);
        self.report_range(range_error);

        debug!(
            blocked = snapshot.stabilized.blocked,
            raw_blocked = snapshot.stabilized.raw_blocked,
            zone = ?snapshot.range_zone,
            %mode,
            "perception cycle"
        );
        self.state.publish(snapshot)
    }

    fn report_camera(&mut self, snapshot: &DetectorSnapshot, error: Option<String>) {
        if snapshot.vision_ok {
            if self.camera_fault_reported {
                info!(camera = self.camera.id(), "camera recovered");
                self.camera_fault_reported = false;
            }
            return;
        }
        let limit = self.pipeline.config().max_missed_frames.max(1);
        if !self.camera_fault_reported && self.pipeline.missed_frames() >= limit {
            self.camera_fault_reported = true;
            let message = error.unwrap_or_else(|| "no usable frames".to_string());
            self.fault(self.camera.id().to_string(), message);
        }
    }

    fn report_range(&mut self, error: Option<String>) {
        let Some(sensor) = self.range.as_ref() else {
            return;
        };
        match error {
            Some(message) if !self.range_fault_reported => {
                self.range_fault_reported = true;
                self.fault(sensor.id().to_string(), message);
            }
            Some(_) => {}
            None => {
                if self.range_fault_reported {
                    info!(sensor = sensor.id(), "range sensor recovered");
                    self.range_fault_reported = false;
                }
            }
        }
    }

    fn fault(&self, component: String, message: String) {
        warn!(%component, %message, "sensor fault");
        self.bus.emit(
            Topic::Perception,
            Event::new(SOURCE, EventPayload::SensorFault { component, message }),
        );
    }
}

/// Handle to a running perception thread.  Dropping it stops the thread.
pub struct PerceptionLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PerceptionLoop {
    /// Start `worker` on a new thread, cycling every `frame_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::Config`] when the OS refuses to create the
    /// thread.
    pub fn spawn(worker: PerceptionWorker, frame_interval: Duration) -> Result<Self, SafetyError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("crewsafe-perception".into())
            .spawn(move || run(worker, frame_interval, flag))
            .map_err(|e| SafetyError::Config(format!("cannot spawn perception thread: {e}")))?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for the current cycle to finish.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("perception thread panicked");
            }
        }
    }
}

impl Drop for PerceptionLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut worker: PerceptionWorker, frame_interval: Duration, running: Arc<AtomicBool>) {
    info!(
        interval_ms = frame_interval.as_millis() as u64,
        "perception loop started"
    );
    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        worker.step();
        if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    info!("perception loop stopped");
}
