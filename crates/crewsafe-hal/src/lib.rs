//! `crewsafe-hal` – Hardware Abstraction Layer
//!
//! The narrow hardware surface the safety core talks to.  Physical drivers
//! live outside this workspace; they only need to implement these traits.
//!
//! # Modules
//!
//! - [`camera`] – [`Camera`][camera::Camera]: frame source feeding the
//!   perception pipeline.
//! - [`range`] – [`RangeSensor`][range::RangeSensor]: optional single-point
//!   distance sensor (time-of-flight / LiDAR point).
//! - [`drive`] – [`DriveSink`][drive::DriveSink]: actuation sink accepting
//!   `drive(direction, speed)` and `stop()`.
//! - [`sim`] – scriptable simulated drivers for tests and the CLI demo.

pub mod camera;
pub mod drive;
pub mod range;
pub mod sim;

pub use camera::{Camera, CameraFrame, PixelFormat};
pub use drive::{DriveCommand, DriveSink};
pub use range::RangeSensor;
