//! Generic `RangeSensor` trait for single-point distance sensors
//! (time-of-flight modules, single-beam LiDAR, ultrasonic rangers, …).

use crewsafe_types::SafetyError;

/// A forward-facing single-point distance sensor.
pub trait RangeSensor: Send {
    /// Stable identifier for this sensor, e.g. `"tof_front"`.
    fn id(&self) -> &str;

    /// Read the current distance in centimetres.
    ///
    /// `Ok(None)` means the sensor answered but had no valid return (out of
    /// range, no target); callers treat that as "sensor not ok" for the cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::SensorUnavailable`] when the device cannot be
    /// read at all.
    fn read_cm(&mut self) -> Result<Option<f32>, SafetyError>;
}
