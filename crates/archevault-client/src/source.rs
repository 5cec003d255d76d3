//! Realtime event sources.
//!
//! A [`Subscription`] is bound to one room topic. Dropping it or calling
//! [`Subscription::unsubscribe`] releases the underlying channel.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use archevault_types::events::GatewayEvent;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Event(GatewayEvent),
    /// The channel dropped and came back; pushes may have been missed.
    Reconnected,
}

pub struct Subscription {
    topic: Uuid,
    events: mpsc::UnboundedReceiver<SourceEvent>,
    // Dropping the sender tells the producer to stop.
    _cancel: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(
        topic: Uuid,
        events: mpsc::UnboundedReceiver<SourceEvent>,
        cancel: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            topic,
            events,
            _cancel: cancel,
        }
    }

    pub fn topic(&self) -> Uuid {
        self.topic
    }

    /// Next event, or `None` once the source has closed the subscription.
    pub async fn recv(&mut self) -> Option<SourceEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        debug!("Unsubscribing from room {}", self.topic);
        self.events.close();
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens a subscription to the room topic `room_id`. Room-scoped events
    /// for other rooms are never delivered on it.
    async fn subscribe(&self, room_id: Uuid) -> Result<Subscription>;
}

/// In-process event source. Events are published by hand, which makes it the
/// source of choice for tests and offline tooling.
#[derive(Default)]
pub struct MemoryEventSource {
    subscribers: Mutex<Vec<(Uuid, mpsc::UnboundedSender<SourceEvent>)>>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to subscribers of its room, or to everyone for events
    /// that are not room-scoped. Returns how many subscribers received it.
    pub fn publish(&self, event: GatewayEvent) -> usize {
        let room_id = event.room_id();
        self.send_where(|topic| room_id.is_none_or(|id| id == topic), || {
            SourceEvent::Event(event.clone())
        })
    }

    /// Simulates a dropped and re-established channel.
    pub fn reconnect(&self) -> usize {
        self.send_where(|_| true, || SourceEvent::Reconnected)
    }

    /// Subscriptions that have not been released yet.
    pub fn active_subscriptions(&self) -> usize {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return 0;
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.len()
    }

    pub fn active_topics(&self) -> Vec<Uuid> {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return vec![];
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.iter().map(|(topic, _)| *topic).collect()
    }

    fn send_where(
        &self,
        matches: impl Fn(Uuid) -> bool,
        make: impl Fn() -> SourceEvent,
    ) -> usize {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return 0;
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers
            .iter()
            .filter(|(topic, _)| matches(*topic))
            .filter(|(_, tx)| tx.send(make()).is_ok())
            .count()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn subscribe(&self, room_id: Uuid) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push((room_id, tx));
        }
        Ok(Subscription::new(room_id, rx, None))
    }
}
