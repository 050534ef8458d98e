//! `GET /control/v1/events` — Server-Sent Events.
//!
//! Sends the runtime-event ring as an initial snapshot, then live
//! events. A `: keepalive` comment goes out every 15 seconds; broken
//! connections are pruned silently by the hub.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};

use super::auth::{authorize, Scope};
use super::control::ControlState;

pub async fn runtime_events(
    State(state): State<ControlState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = authorize(&state, &headers, addr, Scope::Read) {
        return resp;
    }

    let (snapshot, mut rx) = state.gateway.app.hub.subscribe();

    let stream = async_stream::stream! {
        for record in snapshot {
            yield Ok::<_, Infallible>(to_sse(&record));
        }
        while let Some(record) = rx.recv().await {
            yield Ok(to_sse(&record));
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

fn to_sse(record: &crate::events::RuntimeEventRecord) -> Event {
    Event::default()
        .event("runtime")
        .data(serde_json::to_string(record).unwrap_or_default())
}
