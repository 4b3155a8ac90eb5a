//! Agent-facing WebSocket endpoint, grounded in the teacher's
//! `server::core_services::process_agent_stream` loop: split the socket into write and read
//! halves, drive a write-back task off an mpsc channel, and run a `tokio::select!` over
//! incoming frames, outgoing frames and a ping/liveness timer. Re-expressed here over JSON
//! text frames instead of protobuf binary frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::db::{AggregationBuffer, MetricsBuffer, QueryService, Writer};
use crate::live_state::LiveStateHandle;

use super::protocol::{ClientFrame, LastBucketWire, PingTargetWire, ServerFrame};
use super::registry::AgentRegistryHandle;

const WRITE_CHANNEL_CAPACITY: usize = 256;
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
pub struct IngestionState {
    pub config: ConfigHandle,
    pub registry: AgentRegistryHandle,
    pub live_state: LiveStateHandle,
    pub metrics_buffer: Arc<MetricsBuffer>,
    pub aggregation_buffer: Arc<AggregationBuffer>,
    pub writer: Arc<Writer>,
    pub query: Arc<QueryService>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<IngestionState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: IngestionState) {
    let (mut sink, mut stream) = socket.split();

    // First frame must be Auth; anything else or a closed socket before that ends the
    // connection immediately.
    let Some(Ok(Message::Text(text))) = stream.next().await else {
        return;
    };
    let Ok(ClientFrame::Auth { server_id, token }) = serde_json::from_str::<ClientFrame>(&text)
    else {
        let _ = send_frame(&mut sink, &ServerFrame::Error {
            message: "first frame must be auth".into(),
        })
        .await;
        return;
    };

    let authorized = {
        let cfg = state.config.read().await;
        cfg.find_server(&server_id)
            .map(|s| s.auth_token == token)
            .unwrap_or(false)
    };

    if !authorized {
        warn!(server_id, %addr, "rejected agent authentication");
        let _ = send_frame(&mut sink, &ServerFrame::Auth {
            ok: false,
            reason: Some("invalid server id or token".into()),
            ping_targets: None,
            last_seen: None,
            last_buckets: None,
        })
        .await;
        return;
    }

    let ping_targets = {
        let cfg = state.config.read().await;
        cfg.probe
            .ping_targets
            .iter()
            .map(|t| PingTargetWire {
                name: t.name.clone(),
                host: t.host.clone(),
            })
            .collect::<Vec<_>>()
    };

    // Resumable sync (§4.1): tell the reconnecting agent what the hub already has so it
    // doesn't re-send buckets we've already stored.
    let (last_seen, last_buckets) = match state.query.resume_sync(&server_id) {
        Ok(resume) => (
            resume.last_seen,
            resume
                .last_buckets
                .into_iter()
                .map(|(granularity, bucket)| LastBucketWire { granularity, bucket })
                .collect(),
        ),
        Err(e) => {
            warn!(server_id, error = %e, "failed to read resumable-sync state");
            (None, Vec::new())
        }
    };

    if send_frame(&mut sink, &ServerFrame::Auth {
        ok: true,
        reason: None,
        ping_targets: Some(ping_targets.clone()),
        last_seen,
        last_buckets: Some(last_buckets),
    })
    .await
    .is_err()
    {
        return;
    }

    info!(server_id, %addr, "agent authenticated");

    let _ = send_frame(&mut sink, &ServerFrame::Config {
        ping_targets,
        sample_interval_secs: 5,
    })
    .await;

    let (tx, mut rx) = mpsc::channel::<ServerFrame>(WRITE_CHANNEL_CAPACITY);
    state.registry.register(server_id.clone(), tx.clone());

    let mut writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if send_frame(&mut sink, &frame).await.is_err() {
                break;
            }
        }
    });

    let mut liveness = interval(LIVENESS_TIMEOUT);
    liveness.tick().await;

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        liveness.reset();
                        handle_client_frame(&state, &server_id, &addr, &text, &tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(server_id, error = %e, "agent socket error");
                        break;
                    }
                }
            }
            _ = liveness.tick() => {
                debug!(server_id, "agent liveness timeout, closing connection");
                break;
            }
            _ = &mut writer_task => break,
        }
    }

    state.registry.deregister(&server_id, &tx);
    state.live_state.remove(&server_id);
    writer_task.abort();
    info!(server_id, %addr, "agent disconnected");
}

async fn handle_client_frame(
    state: &IngestionState,
    server_id: &str,
    addr: &SocketAddr,
    text: &str,
    tx: &mpsc::Sender<ServerFrame>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            let _ = tx
                .send(ServerFrame::Error {
                    message: format!("malformed frame: {e}"),
                })
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::Auth { .. } => {
            let _ = tx
                .send(ServerFrame::Error {
                    message: "unexpected duplicate auth frame".into(),
                })
                .await;
        }
        ClientFrame::Ping => {
            let _ = tx.send(ServerFrame::Pong).await;
        }
        ClientFrame::Metrics { sample } => {
            state
                .live_state
                .update(&server_id.to_string(), sample.clone(), Some(addr.ip().to_string()));
            match state.metrics_buffer.record_sample(server_id, &sample, &state.writer) {
                Ok(true) => {}
                Ok(false) => debug!(server_id, "dropped duplicate sample"),
                Err(e) => warn!(server_id, error = %e, "failed to record sample"),
            }
        }
        ClientFrame::BatchMetrics { samples } => {
            let mut accepted = 0usize;
            let mut rejected = 0usize;
            for sample in samples {
                state.live_state.update(
                    &server_id.to_string(),
                    sample.clone(),
                    Some(addr.ip().to_string()),
                );
                match state.metrics_buffer.record_sample(server_id, &sample, &state.writer) {
                    Ok(true) => accepted += 1,
                    Ok(false) => rejected += 1,
                    Err(e) => {
                        warn!(server_id, error = %e, "failed to record batched sample");
                        rejected += 1;
                    }
                }
            }
            let _ = tx.send(ServerFrame::BatchAck { accepted, rejected }).await;
        }
        ClientFrame::AggregatedMetrics { bucket } => {
            if let Err(e) = state.aggregation_buffer.accept(bucket, &state.writer) {
                warn!(server_id, error = %e, "failed to accept aggregated bucket");
            }
        }
    }
}

async fn send_frame(
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_else(|_| "{}".to_string());
    sink.send(Message::Text(text.into())).await
}
