use dashmap::DashMap;
use futures::Stream;
use futures::stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-vehicle calendar changes.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to every persisted row event for a vehicle.
    pub fn subscribe(&self, vehicle_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Calendar changes for a vehicle as a stream. A subscriber that falls
    /// behind skips what it missed; the stream ends when the hub is dropped.
    pub fn stream(&self, vehicle_id: Ulid) -> impl Stream<Item = Event> + Send + use<> {
        stream::unfold(self.subscribe(vehicle_id), move |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("subscriber for vehicle {vehicle_id} lagged by {n} events");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    /// No-op if nobody is listening. Channels whose subscribers are all gone
    /// are dropped.
    pub fn send(&self, vehicle_id: Ulid, event: &Event) {
        let closed = match self.channels.get(&vehicle_id) {
            Some(sender) => sender.send(event.clone()).is_err() && sender.receiver_count() == 0,
            None => false,
        };
        if closed {
            self.channels
                .remove_if(&vehicle_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
