//! End-to-end WebSocket tests: real server on an ephemeral port, real
//! client frames, scripted provider behind the trait boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use scout_core::{EnrichmentPayload, fallback_payload};
use scout_llm::{ProviderError, ProviderResult, VisionProvider};
use scout_server::{ServerConfig, ServerHandle, start};

/// Provider whose behavior is keyed on the label:
/// `"hard"` fails fatally, `"format"` always fails validation, `"slow"`
/// never resolves, `"gate:<n>"` resolves when its gate is released, and
/// anything else succeeds immediately.
struct TestProvider {
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    started: AtomicUsize,
}

impl TestProvider {
    fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
        }
    }

    async fn gate(&self, name: &str) -> Arc<Notify> {
        let mut gates = self.gates.lock().await;
        Arc::clone(gates.entry(name.to_string()).or_default())
    }

    fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

fn payload_for(label: &str) -> EnrichmentPayload {
    let mut payload = fallback_payload(label);
    payload.enrichment.summary = format!("about {label}");
    payload
}

#[async_trait]
impl VisionProvider for TestProvider {
    async fn enrich(&self, _crop: &str, label: &str) -> ProviderResult<EnrichmentPayload> {
        let _ = self.started.fetch_add(1, Ordering::SeqCst);
        match label {
            "hard" => Err(ProviderError::Api {
                status: 500,
                message: "backend exploded".into(),
            }),
            "format" => Err(ProviderError::ContentFormat {
                message: "prose instead of JSON".into(),
            }),
            "slow" => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            gated if gated.starts_with("gate:") => {
                let gate = self.gate(gated).await;
                gate.notified().await;
                Ok(payload_for(gated))
            }
            other => Ok(payload_for(other)),
        }
    }
}

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(provider: Arc<TestProvider>) -> ServerHandle {
    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    start(config, provider).await.expect("server start")
}

async fn connect(port: u16) -> WsClient {
    let url = format!("ws://127.0.0.1:{port}/enrich");
    let (client, _) = connect_async(&url).await.expect("ws connect");
    client
}

fn request_frame(track_id: i64, label: &str) -> Message {
    let frame = json!({
        "trackId": track_id,
        "label": label,
        "confidence": 0.9,
        "cropBase64": "aGVsbG8="
    });
    Message::Text(frame.to_string().into())
}

/// Read the next text frame as JSON, skipping control frames.
async fn next_json(client: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame is complete JSON");
        }
    }
}

async fn wait_for_drain(handle: &ServerHandle) {
    for _ in 0..100 {
        if handle.active_connections() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "connection did not drain, {} still active",
        handle.active_connections()
    );
}

#[tokio::test]
async fn valid_request_gets_enriched_response() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    client.send(request_frame(1, "mug")).await.unwrap();
    let frame = next_json(&mut client).await;

    assert_eq!(frame["trackId"], 1);
    assert_eq!(frame["identification"]["name"], "mug");
    assert_eq!(frame["enrichment"]["summary"], "about mug");
    assert!(frame.get("error").is_none());
}

#[tokio::test]
async fn malformed_frame_is_dropped_connection_survives() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    // Missing trackId: dropped with no response, no close.
    let bad = json!({"label": "mug", "confidence": 0.5, "cropBase64": "x"});
    client.send(Message::Text(bad.to_string().into())).await.unwrap();
    // Not JSON at all: same treatment.
    client.send(Message::Text("garbage".into())).await.unwrap();

    // A subsequent valid frame is still processed normally.
    client.send(request_frame(2, "chair")).await.unwrap();
    let frame = next_json(&mut client).await;
    assert_eq!(frame["trackId"], 2);
    assert_eq!(frame["identification"]["name"], "chair");

    // The malformed frames never reached the provider.
    assert_eq!(provider.started(), 1);
}

#[tokio::test]
async fn hard_failure_yields_error_marker() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    client.send(request_frame(5, "hard")).await.unwrap();
    let frame = next_json(&mut client).await;
    assert_eq!(frame, json!({"error": true, "trackId": 5}));
}

#[tokio::test]
async fn repeated_format_failure_yields_fallback() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    client.send(request_frame(6, "format")).await.unwrap();
    let frame = next_json(&mut client).await;

    assert_eq!(frame["trackId"], 6);
    assert_eq!(frame["identification"]["name"], "format");
    assert_eq!(frame["identification"]["color"], "unknown");
    assert_eq!(frame["enrichment"]["price_estimate"]["currency"], "USD");
    assert_eq!(frame["enrichment"]["specs"], json!({}));
    // One call plus exactly one retry.
    assert_eq!(provider.started(), 2);
}

#[tokio::test]
async fn responses_complete_out_of_order() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    client.send(request_frame(1, "gate:a")).await.unwrap();
    client.send(request_frame(2, "gate:b")).await.unwrap();

    // Wait until both units are inside their provider call.
    for _ in 0..100 {
        if provider.started() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(provider.started(), 2);

    // Release the second request first: its response must arrive first.
    provider.gate("gate:b").await.notify_one();
    let first = next_json(&mut client).await;
    assert_eq!(first["trackId"], 2);

    provider.gate("gate:a").await.notify_one();
    let second = next_json(&mut client).await;
    assert_eq!(second["trackId"], 1);

    // Both frames arrived whole: complete JSON with the full payload shape.
    for frame in [&first, &second] {
        assert!(frame["identification"].is_object());
        assert!(frame["enrichment"].is_object());
    }
}

#[tokio::test]
async fn close_with_inflight_units_drains_cleanly() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    const K: usize = 4;
    for i in 0..K {
        client.send(request_frame(i as i64, "slow")).await.unwrap();
    }

    // All K units must be in flight before we pull the plug.
    for _ in 0..100 {
        if provider.started() == K {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(provider.started(), K);
    assert_eq!(handle.active_connections(), 1);

    client.close(None).await.unwrap();

    // The session must cancel all K units and finish within a bounded
    // window, even though no provider call ever resolves.
    wait_for_drain(&handle).await;

    // Nothing was written back for any of the K requests.
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => panic!("unexpected frame after close: {text}"),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => break,
        }
    }
}

#[tokio::test]
async fn one_response_per_track_id() {
    let provider = Arc::new(TestProvider::new());
    let handle = start_server(Arc::clone(&provider)).await;
    let mut client = connect(handle.port).await;

    client.send(request_frame(11, "lamp")).await.unwrap();
    client.send(request_frame(12, "hard")).await.unwrap();
    client.send(request_frame(13, "format")).await.unwrap();

    let mut seen: HashMap<i64, usize> = HashMap::new();
    for _ in 0..3 {
        let frame = next_json(&mut client).await;
        let track_id = frame["trackId"].as_i64().unwrap();
        *seen.entry(track_id).or_default() += 1;
    }

    assert_eq!(seen.len(), 3);
    assert!(seen.values().all(|&count| count == 1));

    // No extra frames are waiting.
    client.close(None).await.unwrap();
    wait_for_drain(&handle).await;
}
