//! `crewsafe-kernel` – Safety & Orchestration
//!
//! The brainstem of CrewSafe.  It does not see; it enforces rules on what
//! the robot may do given what perception has published.
//!
//! # Modules
//!
//! - [`shared_state`] – [`SharedDetectorState`][shared_state::SharedDetectorState]:
//!   the single versioned snapshot written by the perception thread and read
//!   by the UI endpoint, the agent loop and the reflex monitor.
//! - [`policy`] – [`MotionPolicy`][policy::MotionPolicy]: an ordered rule
//!   engine that validates every [`MotionRequest`][crewsafe_types::MotionRequest]
//!   against the latest snapshot and the motion history.
//! - [`motion_gate`] – [`MotionGate`][motion_gate::MotionGate]: the single
//!   entry point for motion.  Admits or rejects requests, dispatches drive
//!   commands and supervises each accepted motion with a reflex session.
//! - [`reflex`] – [`ReflexMonitor`][reflex::ReflexMonitor]: a cancellable
//!   periodic check that stops the drive as soon as the path closes.

pub mod motion_gate;
pub mod policy;
pub mod reflex;
pub mod shared_state;

pub use motion_gate::{GateConfig, MotionGate, MotionHistory};
pub use policy::{GateContext, GateRule, MotionPolicy};
pub use reflex::{ReflexMonitor, ReflexOutcome};
pub use shared_state::SharedDetectorState;
