//! Generic `DriveSink` trait – the actuation command sink of the mobile base.
//!
//! Motor and servo drivers implement this trait.  The motion gate and the
//! reflex monitor only ever talk to the trait, so a driver can be swapped
//! without touching any safety logic.

use crewsafe_types::{Direction, SafetyError};

/// A command as seen by the actuation layer.  Used by recording drivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveCommand {
    Drive { direction: Direction, speed: f32 },
    Stop,
}

/// The mobile base's actuation sink.
pub trait DriveSink: Send {
    /// Stable identifier, e.g. `"wheel_base"`.
    fn id(&self) -> &str;

    /// Start moving in `direction` at `speed` (m/s, or deg/s for turns).
    /// Motion continues until [`stop`][Self::stop] is called.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::Actuation`] when the command cannot be applied.
    fn drive(&mut self, direction: Direction, speed: f32) -> Result<(), SafetyError>;

    /// Halt all wheels immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::Actuation`] when the controller does not accept
    /// the command.
    fn stop(&mut self) -> Result<(), SafetyError>;
}
