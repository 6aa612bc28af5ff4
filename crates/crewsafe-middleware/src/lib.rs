//! `crewsafe-middleware` – The Nervous System
//!
//! Routes safety events between the motion gate, the reflex monitor, the
//! perception loop and external observers (cockpit, REPL) without caring
//! about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – Typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
