//! In-process event fan-out backing the SSE endpoint.
//!
//! Each subscriber gets its own bounded channel; a full channel drops the
//! new event for that subscriber rather than blocking the emitter. The
//! subscriber table sits behind a read/write lock and broadcasts only take
//! the read side.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Buffered events per subscriber before drop-newest kicks in.
const SUBSCRIBER_BUFFER: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    DeviceStatusUpdated {
        device_id: String,
        battery_voltage: Option<f32>,
        rssi: Option<i32>,
        firmware_version: Option<String>,
        last_seen: DateTime<Utc>,
    },
    PlaylistIndexChanged {
        device_id: String,
        playlist_item_id: i64,
    },
    Ping,
}

impl BusEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusEvent::DeviceStatusUpdated { .. } => "device_status_updated",
            BusEvent::PlaylistIndexChanged { .. } => "playlist_index_changed",
            BusEvent::Ping => "ping",
        }
    }
}

struct Subscriber {
    device_id: Option<String>,
    user_id: Option<i64>,
    tx: mpsc::Sender<BusEvent>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

/// Unsubscribes when the SSE connection drops.
pub struct SubscriptionGuard {
    bus: Arc<EventBus>,
    id: u64,
}

impl SubscriptionGuard {
    pub fn new(bus: Arc<EventBus>, id: u64) -> Self {
        Self { bus, id }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, optionally filtered by device and/or user.
    /// No filter means every event. The returned id feeds a
    /// [`SubscriptionGuard`] tied to the connection's lifetime.
    pub fn subscribe(
        &self,
        device_id: Option<String>,
        user_id: Option<i64>,
    ) -> (u64, mpsc::Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().unwrap().insert(
            id,
            Subscriber {
                device_id,
                user_id,
                tx,
            },
        );
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().unwrap().remove(&id);
    }

    /// Fan an event out to matching subscribers. Never blocks: a slow
    /// subscriber silently loses this event.
    pub fn emit(&self, device_id: &str, user_id: Option<i64>, event: BusEvent) {
        let subscribers = self.subscribers.read().unwrap();
        for sub in subscribers.values() {
            let device_match = sub
                .device_id
                .as_deref()
                .map(|want| want == device_id)
                .unwrap_or(true);
            let user_match = match (sub.user_id, user_id) {
                (Some(want), Some(have)) => want == have,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if device_match && user_match {
                let _ = sub.tx.try_send(event.clone());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}
