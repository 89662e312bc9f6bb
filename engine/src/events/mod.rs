//! Event bus for lifecycle notifications
//!
//! The EventBus provides a pub/sub pattern so UI and other collaborators can
//! follow plugin lifecycle changes without holding references into the
//! registry. It uses bounded channels to prevent unbounded memory growth and
//! supports both specific event subscriptions and global "All" subscriptions.
//!
//! Publishing never waits on a slow subscriber: an event that does not fit in
//! a subscriber's buffer is dropped for that subscriber. The next delivery
//! that fits is preceded by [`Event::Lagged`] carrying the number of events
//! missed, after which the subscriber should re-read current states from the
//! registry. Events about one plugin are delivered in the order its
//! transitions happened.

use crate::lifecycle::PluginState;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Event types that can be subscribed to
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    /// A plugin moved between lifecycle states
    StateChanged,
    /// A scan has started
    ScanStarted,
    /// A scan has finished and the catalog was replaced
    ScanCompleted,
    /// A bundle could not be discovered
    ManifestSkipped,
    /// A plugin left the catalog
    PluginDropped,
    /// Events were dropped for a subscriber
    ///
    /// Markers go only to the subscriber that lagged, whatever it
    /// subscribed to.
    Lagged,
    /// Subscribe to all event types
    All,
}

/// Events published on the bus
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// `from` is `None` when the plugin first enters the catalog
    StateChanged {
        plugin_id: String,
        from: Option<PluginState>,
        to: PluginState,
    },
    ScanStarted,
    ScanCompleted {
        discovered: usize,
        skipped: usize,
        removed: usize,
    },
    ManifestSkipped { path: PathBuf, reason: String },
    PluginDropped { plugin_id: String },
    /// `missed` events were dropped because this subscriber's buffer was full
    Lagged { missed: u64 },
}

impl Event {
    /// Get the event type for this event
    pub fn event_type(&self) -> EventType {
        match self {
            Event::StateChanged { .. } => EventType::StateChanged,
            Event::ScanStarted => EventType::ScanStarted,
            Event::ScanCompleted { .. } => EventType::ScanCompleted,
            Event::ManifestSkipped { .. } => EventType::ManifestSkipped,
            Event::PluginDropped { .. } => EventType::PluginDropped,
            Event::Lagged { .. } => EventType::Lagged,
        }
    }

    /// Plugin this event concerns, if any
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Event::StateChanged { plugin_id, .. } | Event::PluginDropped { plugin_id } => {
                Some(plugin_id)
            }
            _ => None,
        }
    }
}

/// Bus for lifecycle notifications
///
/// Each subscriber gets its own bounded channel. Subscribers whose receiver
/// was dropped are pruned on the next publish.
pub struct EventBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<Subscriber>>>>,
}

struct Subscriber {
    tx: mpsc::Sender<Event>,
    /// Events dropped since the last delivered marker
    missed: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels
            .entry(event_type)
            .or_default()
            .push(Subscriber { tx, missed: 0 });
        rx
    }

    /// Publish an event to its type's subscribers and to `All` subscribers
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain_mut(|subscriber| subscriber.deliver(&event));
            }
        }
    }

    /// Number of live subscribers across all event types
    pub async fn subscriber_count(&self) -> usize {
        let channels = self.channels.lock().await;
        channels
            .values()
            .flatten()
            .filter(|subscriber| !subscriber.tx.is_closed())
            .count()
    }
}

impl Subscriber {
    /// Send without waiting; returns false once the receiver is gone
    fn deliver(&mut self, event: &Event) -> bool {
        if self.missed > 0 {
            match self.tx.try_send(Event::Lagged {
                missed: self.missed,
            }) {
                Ok(()) => self.missed = 0,
                Err(TrySendError::Full(_)) => {
                    self.missed += 1;
                    return true;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        match self.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    event_type = ?dropped.event_type(),
                    "Event subscriber is full, dropping event"
                );
                self.missed += 1;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
