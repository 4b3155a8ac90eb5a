//! Viewer-facing WebSocket endpoint: sends the cached snapshot once on connect, then streams
//! deltas from the broadcaster until the viewer disconnects.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::config::ConfigHandle;
use crate::live_state::LiveStateHandle;

use super::broadcaster::BroadcasterHandle;
use super::snapshot::SnapshotCacheHandle;

#[derive(Clone)]
pub struct DashboardState {
    pub snapshot: SnapshotCacheHandle,
    pub broadcaster: BroadcasterHandle,
    pub config: ConfigHandle,
    pub live_state: LiveStateHandle,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<DashboardState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: DashboardState) {
    let (mut sink, mut stream) = socket.split();

    let init_frames = state
        .snapshot
        .init_frames_fresh(&state.config, &state.live_state)
        .await;
    for frame in init_frames {
        if sink.send(Message::Text(frame.as_ref().into())).await.is_err() {
            return;
        }
    }

    let (viewer_id, mut rx) = state.broadcaster.register(state.snapshot.summaries());

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        let text = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.broadcaster.deregister(viewer_id);
    debug!(%viewer_id, "dashboard viewer disconnected");
}
