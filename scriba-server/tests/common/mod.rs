//! Shared harness: boots the full router on an ephemeral port with the
//! stub engine factory and fast recorder timings.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use scriba_core::{EngineFactory, StubFactory};
use scriba_server::config::ServerConfig;
use scriba_server::state::AppState;
use scriba_server::{build_state, router};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    // Tight, sample-timed thresholds so flows complete in milliseconds.
    config.main_transcriber.post_speech_silence_duration = 0.064; // 2 frames
    config.main_transcriber.min_length_of_recording = 0.05;
    config.main_transcriber.min_gap_between_recordings = 0.0;
    config.main_transcriber.pre_recording_buffer_duration = 0.064;
    config.main_transcriber.webrtc_sensitivity = 1;
    config.server.auth_timeout_secs = 1;
    // Keep previews out of event-order assertions.
    config.live_transcriber.preview_interval_secs = 30.0;
    config
}

pub async fn spawn_server(config: ServerConfig) -> (SocketAddr, AppState) {
    spawn_server_with(config, Box::new(StubFactory)).await
}

pub async fn spawn_server_with(
    config: ServerConfig,
    factory: Box<dyn EngineFactory>,
) -> (SocketAddr, AppState) {
    let state = build_state(config, factory);
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("server task");
    });
    (addr, state)
}

pub async fn connect_ws(addr: SocketAddr, client_type: Option<&str>) -> WsClient {
    let mut request = format!("ws://{addr}/ws")
        .into_client_request()
        .expect("client request");
    if let Some(kind) = client_type {
        request
            .headers_mut()
            .insert("x-client-type", kind.parse().expect("header value"));
    }
    let (ws, _) = connect_async(request).await.expect("websocket connect");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send text frame");
}

pub async fn send_audio(ws: &mut WsClient, sample_rate: u32, samples: &[i16]) {
    let pcm = scriba_core::audio::samples_to_pcm_bytes(samples);
    let frame = scriba_server::protocol::encode_binary_frame(sample_rate, &pcm);
    ws.send(Message::Binary(frame.into()))
        .await
        .expect("send binary frame");
}

/// Next JSON envelope from the server (skips non-text frames).
pub async fn recv_json(ws: &mut WsClient) -> Value {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str::<Value>(text.as_str()).expect("valid envelope");
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for message: {other:?}"),
            }
        }
    })
    .await
    .expect("server message within timeout")
}

/// Collect envelope types until (and including) `last`, skipping `preview`.
pub async fn collect_until(ws: &mut WsClient, last: &str) -> Vec<(String, Value)> {
    let mut seen = Vec::new();
    loop {
        let value = recv_json(ws).await;
        let kind = value["type"].as_str().unwrap_or_default().to_string();
        if kind == "preview" {
            continue;
        }
        let done = kind == last;
        seen.push((kind, value));
        if done {
            return seen;
        }
    }
}

pub async fn authenticate(ws: &mut WsClient) -> Value {
    send_json(ws, serde_json::json!({ "type": "auth", "data": {} })).await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "auth_ok", "auth reply: {reply}");
    reply
}
