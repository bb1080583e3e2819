//! Per-client SSE streaming.
//!
//! Each stream sends `event: capabilities` first, then relays bus
//! deliveries as `notification` or `event` blocks, with a `ping` after
//! every 30 seconds of idle. Client disconnect drops the generator, whose
//! guard unsubscribes from the bus and announces the departure.

use std::convert::Infallible;
use std::sync::Arc;

use axum::response::sse::Event;
use chrono::{SecondsFormat, Utc};
use futures::Stream;
use futures::stream;
use serde_json::{Value, json};

use crate::bus::{BusEvent, NotificationBus, topics};
use crate::config::timing;
use crate::protocol::JsonRpcResponse;

/// Unsubscribes and announces the disconnect when the stream is dropped,
/// however it ends: client close, write failure, or host shutdown.
struct DisconnectGuard {
    bus: Arc<NotificationBus>,
    client_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.client_id);
        self.bus.publish(
            topics::CLIENT_DISCONNECTED,
            json!({ "client_id": self.client_id }),
        );
        tracing::info!(client = %self.client_id, "SSE client disconnected");
    }
}

/// Build the long-lived stream for `GET /mcp/stream`.
///
/// Subscribes the client to its own notification topic before the first
/// event is emitted, so nothing published after connect is lost.
pub fn client_stream(
    bus: Arc<NotificationBus>,
    client_id: String,
    capabilities: Value,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let own_topic = topics::client_notifications(&client_id);
    let rx = bus.subscribe(&client_id, &[&own_topic]);
    bus.publish(topics::CLIENT_CONNECTED, json!({ "client_id": client_id }));
    tracing::info!(client = %client_id, "SSE client connected");

    let guard = DisconnectGuard { bus, client_id };

    async_stream::stream! {
        let _guard = guard;
        let mut rx = rx;

        yield Ok::<_, Infallible>(Event::default()
            .event("capabilities")
            .data(capabilities.to_string()));

        loop {
            tokio::select! {
                delivery = rx.recv() => match delivery {
                    Some(event) => yield Ok(render_bus_event(&event)),
                    // Channel closed: the bus pruned us as a slow consumer
                    // or the subscription was replaced.
                    None => break,
                },
                () = tokio::time::sleep(timing::SSE_KEEPALIVE) => {
                    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    yield Ok(Event::default()
                        .event("ping")
                        .data(json!({ "timestamp": stamp }).to_string()));
                }
            }
        }
    }
}

/// One-shot stream for a POST upgraded to SSE: the terminal response
/// envelope as a single `message` event, then end of stream.
pub fn response_stream(
    response: JsonRpcResponse,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let data = serde_json::to_string(&response).unwrap_or_default();
    stream::iter([Ok::<_, Infallible>(
        Event::default().event("message").data(data),
    )])
}

/// Client-addressed deliveries carry a JSON-RPC notification envelope and
/// keep the `notification` event name; everything else arrives wrapped as
/// a generic `event`.
fn render_bus_event(event: &BusEvent) -> Event {
    if event.topic.starts_with("mcp:notifications:") {
        Event::default()
            .event("notification")
            .data(event.payload.to_string())
    } else {
        Event::default().event("event").data(
            json!({ "topic": event.topic, "payload": event.payload }).to_string(),
        )
    }
}
