//! `crewsafe-cockpit` – Operator UI endpoint
//!
//! A small HTTP + WebSocket server in front of a running
//! [`SafetyCore`][crewsafe_runtime::SafetyCore]:
//!
//! 1. **Serves** `GET /status` (the latest status as JSON) and a minimal
//!    embedded status page at `/`.
//! 2. **Streams** the status every push interval plus every event from the
//!    [`EventBus`][crewsafe_middleware::EventBus] to each WebSocket client.
//! 3. **Accepts** `mode`, `motion` and `stop` commands over the WebSocket.
//!    Motion requests go through the same motion gate as the autonomous
//!    agent; the UI gets no special privileges.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crewsafe_cockpit::CockpitServer;
//! use crewsafe_hal::sim::SimDrive;
//! use crewsafe_middleware::EventBus;
//! use crewsafe_runtime::{CoreConfig, SafetyCore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let core = SafetyCore::new(&CoreConfig::default(), Box::new(SimDrive::new("wheel_base")), EventBus::default());
//!     if let Err(e) = CockpitServer::new(Arc::new(core)).run().await {
//!         eprintln!("cockpit server failed: {e}");
//!     }
//! }
//! ```

pub mod server;

pub use server::{
    CockpitCommand, CockpitMessage, CockpitServer, DEFAULT_PORT, DEFAULT_PUSH_INTERVAL,
    parse_command,
};
