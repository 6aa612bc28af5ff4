//! `crewsafe-runtime` – Process wiring
//!
//! Puts the perception pipeline, the shared state and the motion gate
//! together into one running safety core.
//!
//! # Modules
//!
//! - [`safety_core`] – [`SafetyCore`][safety_core::SafetyCore]: the facade exposing
//!   `status()`, `set_mode()`, `submit()` and `agent_context()` to the UI
//!   endpoint and the autonomous agent.
//! - [`perception_loop`] – [`PerceptionLoop`][perception_loop::PerceptionLoop]:
//!   the dedicated std thread that captures, analyses and publishes a
//!   snapshot every frame.
//! - [`agent_context`] – [`AgentContext`][agent_context::AgentContext]:
//!   plain-text decision context plus the `MotionRequest` JSON schema.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logs, with optional OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod agent_context;
pub mod perception_loop;
pub mod safety_core;
pub mod telemetry;

pub use agent_context::{AgentContext, motion_request_schema};
pub use perception_loop::{PerceptionLoop, PerceptionWorker};
pub use safety_core::{CoreConfig, Hardware, SafetyCore, StatusReport};
pub use telemetry::{TelemetryConfig, TracerProviderGuard, init_tracing};
