//! SSE stream of device and playlist events for UI subscribers.

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use crate::server::AppState;
use crate::services::event_bus::SubscriptionGuard;
use crate::services::BusEvent;

/// Interval of the explicit ping event (on top of the SSE keep-alive
/// comment).
const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only events for this device MAC.
    #[serde(default)]
    pub device_id: Option<String>,
    /// Only events for devices of this user.
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Subscribe to server events
///
/// Emits `device_status_updated` and `playlist_index_changed` events plus a
/// `ping` every 30 seconds. A slow consumer loses events rather than
/// slowing the emitters down.
pub async fn handle_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.bus.subscribe(query.device_id, query.user_id);
    let guard = SubscriptionGuard::new(std::sync::Arc::clone(&state.bus), id);

    // The guard rides inside the stream so the subscription dies with the
    // connection.
    let events = ReceiverStream::new(rx).map(move |event| {
        let _keep_alive = &guard;
        Ok(to_sse_event(&event))
    });

    let pings = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(PING_INTERVAL))
        .map(|_| Ok(to_sse_event(&BusEvent::Ping)));

    Sse::new(events.merge(pings)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_sse_event(event: &BusEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.event_name()).data(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_events_map_to_named_sse_events() {
        let event = to_sse_event(&BusEvent::PlaylistIndexChanged {
            device_id: "AA:BB".into(),
            playlist_item_id: 5,
        });
        // Event is opaque; its Debug output carries the name and payload.
        let debug = format!("{event:?}");
        assert!(debug.contains("playlist_index_changed"));
    }
}
