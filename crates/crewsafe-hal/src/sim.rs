//! In-process simulated drivers for tests and hardware-free demos.
//!
//! All simulated devices observe one shared [`SimWorld`].  Tests (or the
//! CLI's `/sim` commands) mutate the world and the camera, range sensor and
//! drive react accordingly.
//!
//! # Example
//!
//! ```rust
//! use crewsafe_hal::sim::{SimCamera, SimWorld};
//! use crewsafe_hal::Camera;
//!
//! let world = SimWorld::new(64, 48);
//! world.place_obstacle(10, 54, 40, 47);
//!
//! let mut camera = SimCamera::new("front", world.clone());
//! let frame = camera.capture().expect("sim capture must succeed");
//! assert_eq!(frame.width, 64);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crewsafe_types::{Direction, SafetyError};
use tracing::debug;

use crate::camera::{Camera, CameraFrame, PixelFormat};
use crate::drive::{DriveCommand, DriveSink};
use crate::range::RangeSensor;

/// Luminance of the empty floor.
const FLOOR_LUMA: u8 = 90;
/// Luminance of simulated obstacles.
const OBSTACLE_LUMA: u8 = 220;

// ────────────────────────────────────────────────────────────────────────────
// Shared world
// ────────────────────────────────────────────────────────────────────────────

/// A rectangular bright obstacle painted into the simulated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimObstacle {
    pub col_start: u32,
    pub col_end: u32,
    pub row_top: u32,
    pub row_bottom: u32,
}

#[derive(Debug)]
struct SimScene {
    width: u32,
    height: u32,
    obstacles: Vec<SimObstacle>,
    range_cm: Option<f32>,
    camera_offline: bool,
    range_offline: bool,
}

/// Handle to the simulated environment.  Clones share the same scene.
#[derive(Debug, Clone)]
pub struct SimWorld {
    scene: Arc<Mutex<SimScene>>,
}

impl SimWorld {
    /// An empty floor of the given image size with no range target.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            scene: Arc::new(Mutex::new(SimScene {
                width,
                height,
                obstacles: Vec::new(),
                range_cm: None,
                camera_offline: false,
                range_offline: false,
            })),
        }
    }

    fn scene(&self) -> MutexGuard<'_, SimScene> {
        self.scene.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Paint a bright rectangle covering columns `[col_start, col_end)` and
    /// rows `[row_top, row_bottom]`.
    pub fn place_obstacle(&self, col_start: u32, col_end: u32, row_top: u32, row_bottom: u32) {
        self.scene().obstacles.push(SimObstacle {
            col_start,
            col_end,
            row_top,
            row_bottom,
        });
    }

    /// Remove every obstacle.
    pub fn clear_obstacles(&self) {
        self.scene().obstacles.clear();
    }

    /// Set the distance the range sensor reports (`None` = no return).
    pub fn set_range(&self, range_cm: Option<f32>) {
        self.scene().range_cm = range_cm;
    }

    /// Make the camera fail every capture while `offline` is set.
    pub fn set_camera_offline(&self, offline: bool) {
        self.scene().camera_offline = offline;
    }

    /// Make the range sensor fail every read while `offline` is set.
    pub fn set_range_offline(&self, offline: bool) {
        self.scene().range_offline = offline;
    }

    /// Image size as `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        let scene = self.scene();
        (scene.width, scene.height)
    }

    pub fn obstacles(&self) -> Vec<SimObstacle> {
        self.scene().obstacles.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera
// ────────────────────────────────────────────────────────────────────────────

/// Renders the [`SimWorld`] as a Gray8 frame.
pub struct SimCamera {
    id: String,
    world: SimWorld,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, world: SimWorld) -> Self {
        Self {
            id: id.into(),
            world,
        }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, SafetyError> {
        let scene = self.world.scene();
        if scene.camera_offline {
            return Err(SafetyError::SensorUnavailable {
                sensor: self.id.clone(),
                details: "simulated camera offline".to_string(),
            });
        }

        let (w, h) = (scene.width, scene.height);
        let mut data = vec![FLOOR_LUMA; w as usize * h as usize];
        for obstacle in &scene.obstacles {
            let rows = obstacle.row_top.min(h)..=obstacle.row_bottom.min(h.saturating_sub(1));
            for y in rows {
                for x in obstacle.col_start.min(w)..obstacle.col_end.min(w) {
                    data[(y * w + x) as usize] = OBSTACLE_LUMA;
                }
            }
        }

        Ok(CameraFrame {
            width: w,
            height: h,
            format: PixelFormat::Gray8,
            data,
            captured_at: Instant::now(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated range sensor
// ────────────────────────────────────────────────────────────────────────────

/// Reports the distance configured on the [`SimWorld`].
pub struct SimRangeSensor {
    id: String,
    world: SimWorld,
}

impl SimRangeSensor {
    pub fn new(id: impl Into<String>, world: SimWorld) -> Self {
        Self {
            id: id.into(),
            world,
        }
    }
}

impl RangeSensor for SimRangeSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn read_cm(&mut self) -> Result<Option<f32>, SafetyError> {
        let scene = self.world.scene();
        if scene.range_offline {
            return Err(SafetyError::SensorUnavailable {
                sensor: self.id.clone(),
                details: "simulated range sensor offline".to_string(),
            });
        }
        Ok(scene.range_cm)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated drive
// ────────────────────────────────────────────────────────────────────────────

/// Records every command it receives.  Clone the [`SimDrive::log`] handle
/// before boxing the driver to assert on commands afterwards.
pub struct SimDrive {
    id: String,
    log: Arc<Mutex<Vec<DriveCommand>>>,
    reject_drive: bool,
}

impl SimDrive {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            log: Arc::new(Mutex::new(Vec::new())),
            reject_drive: false,
        }
    }

    /// A driver whose `drive` always faults (stop still succeeds).
    pub fn faulty(id: impl Into<String>) -> Self {
        Self {
            reject_drive: true,
            ..Self::new(id)
        }
    }

    /// Shared handle to the recorded command log.
    pub fn log(&self) -> Arc<Mutex<Vec<DriveCommand>>> {
        Arc::clone(&self.log)
    }

    fn record(&self, cmd: DriveCommand) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cmd);
    }
}

impl DriveSink for SimDrive {
    fn id(&self) -> &str {
        &self.id
    }

    fn drive(&mut self, direction: Direction, speed: f32) -> Result<(), SafetyError> {
        if self.reject_drive {
            return Err(SafetyError::Actuation {
                component: self.id.clone(),
                details: "simulated motor fault".to_string(),
            });
        }
        debug!(drive = %self.id, %direction, speed, "sim drive");
        self.record(DriveCommand::Drive { direction, speed });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SafetyError> {
        debug!(drive = %self.id, "sim stop");
        self.record(DriveCommand::Stop);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
