use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// A published event in the form read-side consumers receive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// `court_<id>`
    pub channel: String,
    /// The event as JSON.
    pub payload: String,
}

impl Notice {
    pub fn from_event(event: &Event) -> Self {
        Self {
            channel: format!("court_{}", event.court_id()),
            payload: serde_json::to_string(event).unwrap_or_default(),
        }
    }
}

/// Broadcast hub for applied ledger events: one channel per court plus a
/// club-wide feed carrying every event.
pub struct EventHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    feed: broadcast::Sender<Event>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            feed: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one court's events. Creates the channel if needed.
    pub fn subscribe(&self, court_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(court_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Subscribe to every event of the club.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.feed.subscribe()
    }

    /// Publish an event. Lagging or absent receivers never block the sender.
    pub fn send(&self, event: &Event) {
        let court_id = event.court_id();
        if let Some(sender) = self.channels.get(&court_id)
            && sender.send(event.clone()).is_err()
        {
            // Last court subscriber went away.
            drop(sender);
            self.channels
                .remove_if(&court_id, |_, s| s.receiver_count() == 0);
        }
        let _ = self.feed.send(event.clone());
    }
}
