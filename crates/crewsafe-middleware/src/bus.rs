//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.  A slow subscriber loses old events (`Lagged`); publishers are
//! never slowed down, which matters because the reflex monitor publishes
//! from inside the stop path.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Perception`] | Mode changes, sensor faults |
//! | [`Topic::Motion`] | Accepted requests and their final outcomes |
//! | [`Topic::SafetyAlerts`] | Reflex trips and rejected requests |

use crewsafe_types::{Event, SafetyError};
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Perception,
    Motion,
    /// Anything that stopped or refused motion for safety reasons.
    SafetyAlerts,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Perception, Topic::Motion, Topic::SafetyAlerts];
}

/// Shared event bus.  Clone it cheaply – all clones share the same
/// underlying broadcast channels.
///
/// Every event published to a topic is also mirrored onto a global channel,
/// so observers that want everything (the cockpit) need one receiver only.
#[derive(Clone, Debug)]
pub struct EventBus {
    all: broadcast::Sender<Event>,
    perception: broadcast::Sender<Event>,
    motion: broadcast::Sender<Event>,
    safety_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (a Tokio broadcast constraint).
    pub fn new(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        let (perception, _) = broadcast::channel(capacity);
        let (motion, _) = broadcast::channel(capacity);
        let (safety_alerts, _) = broadcast::channel(capacity);
        Self {
            all,
            perception,
            motion,
            safety_alerts,
        }
    }

    // -----------------------------------------------------------------------
    // Topic-based API
    // -----------------------------------------------------------------------

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of topic receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// Returns [`SafetyError::Channel`] when nobody listens on the topic or
    /// on the global channel.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, SafetyError> {
        let mirrored = self.all.send(event.clone()).is_ok();
        match self.topic_sender(topic).send(event) {
            Ok(n) => Ok(n),
            Err(_) if mirrored => Ok(0),
            Err(_) => Err(SafetyError::Channel(format!(
                "no subscribers for topic {topic:?}"
            ))),
        }
    }

    /// Fire-and-forget publish used on safety paths: having no listeners is
    /// not a failure there.
    pub fn emit(&self, topic: Topic, event: Event) {
        if let Err(e) = self.publish_to(topic, event) {
            trace!(?topic, error = %e, "event dropped");
        }
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic: Some(topic),
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    // -----------------------------------------------------------------------
    // Global API
    // -----------------------------------------------------------------------

    /// Subscribe to every event regardless of topic.
    pub fn subscribe_all(&self) -> TopicReceiver {
        TopicReceiver {
            topic: None,
            receiver: self.all.subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Perception => &self.perception,
            Topic::Motion => &self.motion,
            Topic::SafetyAlerts => &self.safety_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to one [`Topic`] channel, or to the global
/// channel when obtained via [`EventBus::subscribe_all`].
pub struct TopicReceiver {
    topic: Option<Topic>,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive; used by the REPL to drain pending alerts.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to; `None` for the global channel.
    pub fn topic(&self) -> Option<Topic> {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewsafe_types::{Direction, EventPayload, OperatingMode, TripReason};

    fn trip() -> Event {
        Event::new(
            "crewsafe-kernel::reflex",
            EventPayload::ReflexTrip {
                direction: Direction::Forward,
                reason: TripReason::ObstacleDetected,
            },
        )
    }

    fn mode_change() -> Event {
        Event::new("test", EventPayload::ModeChanged(OperatingMode::Precision))
    }

    #[tokio::test]
    async fn topic_multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut a = bus.subscribe_to(Topic::SafetyAlerts);
        let mut b = bus.subscribe_to(Topic::SafetyAlerts);

        let event = trip();
        bus.publish_to(Topic::SafetyAlerts, event.clone())?;

        assert_eq!(a.recv().await?.id, event.id);
        assert_eq!(b.recv().await?.id, event.id);
        Ok(())
    }

    #[tokio::test]
    async fn topic_subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SafetyAlerts);
        let _perception = bus.subscribe_to(Topic::Perception);

        bus.publish_to(Topic::Perception, mode_change())?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "alerts subscriber must not see perception events");
        Ok(())
    }

    #[tokio::test]
    async fn global_subscriber_sees_every_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut all = bus.subscribe_all();
        assert_eq!(all.topic(), None);

        bus.publish_to(Topic::Perception, mode_change())?;
        bus.publish_to(Topic::SafetyAlerts, trip())?;

        assert!(matches!(all.recv().await?.payload, EventPayload::ModeChanged(_)));
        assert!(matches!(all.recv().await?.payload, EventPayload::ReflexTrip { .. }));
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_an_error() {
        let bus = EventBus::default();
        let result = bus.publish_to(Topic::Motion, trip());
        assert!(matches!(result, Err(SafetyError::Channel(_))));
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.emit(Topic::SafetyAlerts, trip());
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(16);
        let mut slow = bus.subscribe_to(Topic::Motion);
        for _ in 0..1_000 {
            bus.emit(Topic::Motion, trip());
        }
        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "expected Lagged error, got: {result:?}"
        );
    }

    #[test]
    fn try_recv_drains_pending_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::SafetyAlerts);
        bus.emit(Topic::SafetyAlerts, trip());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
