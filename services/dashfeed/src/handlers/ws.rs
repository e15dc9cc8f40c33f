//! Streaming endpoint sessions
//!
//! Each accepted socket is authenticated from its upgrade request before
//! anything else; a null identity is answered with a policy-violation close
//! and no frames. Authenticated sessions split into a writer task draining
//! the connection's queue and a reader loop routing inbound frames.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use types::event;

use crate::auth;
use crate::clock;
use crate::pipeline;
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::registry::{ConnHandle, Outbound};
use crate::state::AppState;

/// RFC 6455 policy-violation close code.
const POLICY_VIOLATION: u16 = 1008;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    let identity = auth::authenticate(&headers, query.as_deref(), &state.config.jwt_secret);
    ws.on_upgrade(move |socket| handle_session(socket, state, identity))
}

async fn handle_session(mut socket: WebSocket, state: AppState, identity: Option<auth::Claims>) {
    let Some(claims) = identity else {
        let close = CloseFrame {
            code: POLICY_VIOLATION,
            reason: Utf8Bytes::from_static("authentication required"),
        };
        let _ = socket.send(Message::Close(Some(close))).await;
        return;
    };

    let (handle, frames) = state.registry.register();
    let conn_id = handle.id();
    debug!(conn = conn_id, subject = %claims.sub, "streaming session opened");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_frames(sink, handle.clone(), frames));

    read_frames(stream, &state, &handle).await;

    state.registry.unsubscribe_all(conn_id);
    writer.abort();
    debug!(conn = conn_id, "streaming session closed");
}

/// Drain the connection's queue into the socket, acknowledging flushed bytes
/// so the backpressure gate sees real queue depth.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    handle: Arc<ConnHandle>,
    mut frames: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = frames.recv().await {
        match item {
            Outbound::Frame(frame) => {
                let len = frame.len();
                let delivered = sink
                    .send(Message::Text(Utf8Bytes::from(frame.as_ref())))
                    .await
                    .is_ok();
                handle.mark_flushed(len);
                if !delivered {
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

async fn read_frames(mut stream: SplitStream<WebSocket>, state: &AppState, handle: &Arc<ConnHandle>) {
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => handle_text(text.as_str(), state, handle),
            Message::Close(_) => break,
            // Binary and control frames are not part of the protocol.
            _ => {}
        }
    }
}

fn handle_text(text: &str, state: &AppState, handle: &Arc<ConnHandle>) {
    if text.len() > state.config.max_msg_bytes {
        debug!(conn = handle.id(), len = text.len(), "oversized frame ignored");
        return;
    }

    let frame = match serde_json::from_str::<InboundFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(conn = handle.id(), error = %err, "unparseable frame ignored");
            return;
        }
    };

    match frame {
        InboundFrame::Subscribe { topic } => {
            // The snapshot goes into this connection's queue before the
            // topic insert, so the first frame a subscriber sees is the
            // snapshot; any delta broadcast afterwards lands behind it.
            let snapshot = state.aggregator.lock().snapshot(clock::now_millis());
            let frame: Arc<str> = OutboundFrame::AggSnapshot { data: &snapshot }
                .to_json()
                .into();
            state.registry.send_to(handle, frame);
            state.registry.subscribe(handle.id(), &topic);
        }
        InboundFrame::Events { events } => {
            let records = event::filter_batch(events);
            if records.is_empty() {
                return;
            }
            pipeline::publish_batch(state, records);
        }
    }
}
