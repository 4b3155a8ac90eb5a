//! End-to-end coverage of the agent-facing and dashboard-facing WebSocket endpoints, driven
//! over real sockets with `tokio-tungstenite` rather than by calling handlers directly, so the
//! auth gate, frame (de)serialization and the snapshot/broadcaster cadence are all exercised
//! together.

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use vstats_hub::Application;

/// Writes a minimal config with a single registered server and returns its path alongside the
/// `tempfile::NamedTempFile` guard (dropped, and thus deleted, at the end of the test).
fn write_config(server_id: &str, token: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
    let config = json!({
        "frontend_url": "http://localhost:8080",
        "notification_encryption_key": "test-passphrase",
        "servers": [{
            "id": server_id,
            "display_name": "Integration Test Server",
            "auth_token": token,
            "ip_address": null,
            "agent_version": null,
            "monthly_price": null,
            "expiry_date": null,
            "auto_renew": false,
        }],
    });
    file.write_all(config.to_string().as_bytes())
        .expect("write temp config");
    file
}

/// Bootstraps and serves an `Application` in the background, returning the temp db file guard
/// so the caller keeps it alive (and thus the database file in place) for the test's duration.
async fn spawn_app(config_path: &str, bind_addr: SocketAddr) -> tempfile::NamedTempFile {
    let db_file = tempfile::NamedTempFile::new().expect("create temp db file");
    let db_path = db_file.path().to_str().unwrap().to_string();

    let app = Application::bootstrap(Some(config_path.to_string()), Some(db_path))
        .await
        .expect("bootstrap application");
    tokio::spawn(async move {
        app.serve(bind_addr).await.expect("serve");
    });
    // Give the listener a moment to bind before any client connects.
    tokio::time::sleep(Duration::from_millis(100)).await;
    db_file
}

fn sample_json(cpu: f64) -> serde_json::Value {
    json!({
        "type": "metrics",
        "sample": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "cpu_percent": cpu,
            "memory_percent": 40.0,
            "memory_bytes": 1_000_000,
            "disks": [],
            "net": { "rx_bytes": 10, "tx_bytes": 20, "interfaces": [] },
            "load": { "one": 0.1, "five": 0.2, "fifteen": 0.3 },
            "uptime_secs": 120,
            "ping": {},
            "os": { "name": "linux", "kernel": "6.1" },
            "agent_version": "1.2.3",
        }
    })
}

#[tokio::test]
async fn agent_rejects_invalid_token() {
    let config = write_config("srv-auth", "correct-token");
    let bind_addr: SocketAddr = "127.0.0.1:19201".parse().unwrap();
    let _db_file = spawn_app(config.path().to_str().unwrap(), bind_addr).await;

    let (mut ws, _) = connect_async(format!("ws://{bind_addr}/ws/agent"))
        .await
        .expect("connect agent socket");

    ws.send(Message::Text(
        json!({"type": "auth", "server_id": "srv-auth", "token": "wrong-token"})
            .to_string()
            .into(),
    ))
    .await
    .expect("send auth frame");

    let reply = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no timeout")
        .expect("socket closed before reply")
        .expect("ws error");
    let Message::Text(text) = reply else {
        panic!("expected text frame");
    };
    let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(frame["type"], "auth");
    assert_eq!(frame["ok"], false);
}

#[tokio::test]
async fn agent_auth_and_batch_metrics_roundtrip() {
    let config = write_config("srv-batch", "batch-token");
    let bind_addr: SocketAddr = "127.0.0.1:19202".parse().unwrap();
    let _db_file = spawn_app(config.path().to_str().unwrap(), bind_addr).await;

    let (mut ws, _) = connect_async(format!("ws://{bind_addr}/ws/agent"))
        .await
        .expect("connect agent socket");

    ws.send(Message::Text(
        json!({"type": "auth", "server_id": "srv-batch", "token": "batch-token"})
            .to_string()
            .into(),
    ))
    .await
    .expect("send auth frame");

    let auth_reply = next_json(&mut ws).await;
    assert_eq!(auth_reply["type"], "auth");
    assert_eq!(auth_reply["ok"], true);
    // A server with no prior history gets an empty resumable-sync state.
    assert!(auth_reply["last_seen"].is_null());
    assert_eq!(auth_reply["last_buckets"].as_array().unwrap().len(), 0);
    assert_eq!(auth_reply["ok"], true);

    let config_reply = next_json(&mut ws).await;
    assert_eq!(config_reply["type"], "config");

    let batch = json!({
        "type": "batch_metrics",
        "samples": [sample_json(10.0)["sample"], sample_json(20.0)["sample"], sample_json(30.0)["sample"]],
    });
    ws.send(Message::Text(batch.to_string().into()))
        .await
        .expect("send batch");

    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "batch_ack");
    assert_eq!(ack["accepted"], 3);
    assert_eq!(ack["rejected"], 0);
}

#[tokio::test]
async fn dashboard_sees_server_go_online_after_agent_reports() {
    let config = write_config("srv-dash", "dash-token");
    let bind_addr: SocketAddr = "127.0.0.1:19203".parse().unwrap();
    let _db_file = spawn_app(config.path().to_str().unwrap(), bind_addr).await;

    let (mut dash_ws, _) = connect_async(format!("ws://{bind_addr}/ws/dashboard"))
        .await
        .expect("connect dashboard socket");

    let init = next_json(&mut dash_ws).await;
    assert_eq!(init["type"], "stream_init");
    assert_eq!(init["total_servers"], 1);

    let server_frame = next_json(&mut dash_ws).await;
    assert_eq!(server_frame["type"], "stream_server");
    assert_eq!(server_frame["server"]["server_id"], "srv-dash");
    assert_eq!(server_frame["server"]["online"], false);

    let end = next_json(&mut dash_ws).await;
    assert_eq!(end["type"], "stream_end");

    let (mut agent_ws, _) = connect_async(format!("ws://{bind_addr}/ws/agent"))
        .await
        .expect("connect agent socket");
    agent_ws
        .send(Message::Text(
            json!({"type": "auth", "server_id": "srv-dash", "token": "dash-token"})
                .to_string()
                .into(),
        ))
        .await
        .expect("send auth");
    let _auth = next_json(&mut agent_ws).await;
    let _config_push = next_json(&mut agent_ws).await;
    agent_ws
        .send(Message::Text(sample_json(55.0).to_string().into()))
        .await
        .expect("send metrics");

    // The snapshot cache refreshes on a 10s cadence and the broadcaster diffs against it on a
    // 2s cadence, so the online flip can take up to ~12s to surface as a delta frame.
    let deadline = Duration::from_secs(20);
    let result = timeout(deadline, async {
        loop {
            let frame = next_json(&mut dash_ws).await;
            if frame["type"] == "delta" {
                let changes = frame["changes"].as_array().unwrap();
                if let Some(change) = changes.iter().find(|c| c["id"] == "srv-dash") {
                    if change.get("o") == Some(&serde_json::Value::Bool(true)) {
                        return change.clone();
                    }
                }
            }
        }
    })
    .await
    .expect("timed out waiting for online delta");

    assert_eq!(result["c"], 55);
}

async fn next_json(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_secs(15), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}
