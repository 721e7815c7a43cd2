// src/routes/stream.rs
//! Live reading stream endpoint.
//!
//! `GET /ws/stream/{device_id}` upgrades to a websocket and forwards every
//! broadcast payload for that device until the client disconnects. The
//! connection is one-way; inbound frames are drained and ignored except for
//! close. Disconnects of one viewer never affect the others.
//!
//! Exports to the gateway (`mod.rs`): a subrouter with the stream route.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::ingest::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/ws/stream/{device_id}", get(handler))
}

async fn handler(
    Path(device_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    ws.on_upgrade(move |socket| stream_to_client(socket, state, device_id))
}

async fn stream_to_client(socket: WebSocket, state: AppState, device_id: String) {
    // ---
    let (client_id, mut rx) = state.hub.subscribe(&device_id).await;
    let (mut sink, mut source) = socket.split();

    // Forward hub payloads to the socket until the hub side closes or the
    // socket rejects a frame.
    let mut forward = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // Drain inbound frames so protocol pings are answered and the close
    // handshake is observed.
    loop {
        tokio::select! {
            inbound = source.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut forward => break,
        }
    }

    forward.abort();
    state.hub.unsubscribe(&device_id, client_id).await;
    debug!("Stream closed for viewer {} on {}", client_id, device_id);
}
