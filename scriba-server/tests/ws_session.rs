//! End-to-end WebSocket session flows against the full router with the
//! stub engine.

mod common;

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use common::*;

const FRAME: usize = 512;

fn speech(frames: usize) -> Vec<i16> {
    vec![8_000i16; FRAME * frames]
}

fn silence(frames: usize) -> Vec<i16> {
    vec![0i16; FRAME * frames]
}

#[tokio::test]
async fn localhost_auth_ping_and_capabilities() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, None).await;

    let auth = authenticate(&mut ws).await;
    assert_eq!(auth["data"]["client_name"], "localhost-user");
    assert_eq!(auth["data"]["client_type"], "web");
    assert_eq!(auth["data"]["capabilities"]["supports_vad_events"], false);

    send_json(&mut ws, json!({ "type": "ping" })).await;
    let pong = recv_json(&mut ws).await;
    assert_eq!(pong["type"], "pong");

    send_json(&mut ws, json!({ "type": "get_capabilities" })).await;
    let caps = recv_json(&mut ws).await;
    assert_eq!(caps["type"], "capabilities");
    assert_eq!(caps["data"]["client_type"], "web");
}

#[tokio::test]
async fn manual_recording_produces_final_transcript() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, None).await;
    authenticate(&mut ws).await;

    send_json(&mut ws, json!({ "type": "start", "data": {} })).await;
    let started = recv_json(&mut ws).await;
    assert_eq!(started["type"], "session_started");
    assert_eq!(started["data"]["vad_enabled"], false);

    // One second of audible audio at the working rate.
    send_audio(&mut ws, 16_000, &speech(31)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    send_json(&mut ws, json!({ "type": "stop" })).await;

    let flow = collect_until(&mut ws, "final").await;
    let kinds: Vec<&str> = flow.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(kinds, vec!["session_stopped", "final"]);

    let (_, final_msg) = flow.last().unwrap();
    let text = final_msg["data"]["text"].as_str().unwrap();
    assert!(text.contains("scriba stub"), "unexpected text: {text}");
    assert!(final_msg["data"]["duration"].as_f64().unwrap() > 0.5);
}

#[tokio::test]
async fn vad_session_emits_lifecycle_events_in_order() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, Some("standalone")).await;

    let auth = authenticate(&mut ws).await;
    assert_eq!(auth["data"]["client_type"], "standalone");
    assert_eq!(auth["data"]["capabilities"]["supports_vad_events"], true);

    send_json(
        &mut ws,
        json!({ "type": "start", "data": { "use_vad": true } }),
    )
    .await;
    let started = recv_json(&mut ws).await;
    assert_eq!(started["type"], "session_started");
    assert_eq!(started["data"]["vad_enabled"], true);

    // Speech, then enough silence to cross the post-speech threshold
    // (hangover included).
    send_audio(&mut ws, 16_000, &speech(20)).await;
    send_audio(&mut ws, 16_000, &silence(12)).await;

    let flow = collect_until(&mut ws, "final").await;
    let kinds: Vec<&str> = flow.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        kinds,
        vec![
            "vad_start",
            "vad_recording_start",
            "vad_stop",
            "vad_recording_stop",
            "session_stopped",
            "final"
        ]
    );

    let (_, final_msg) = flow.last().unwrap();
    assert!(final_msg["data"]["text"]
        .as_str()
        .unwrap()
        .contains("scriba stub"));
}

#[tokio::test]
async fn second_session_is_rejected_while_job_is_held() {
    let (addr, _state) = spawn_server(test_config()).await;

    let mut alice = connect_ws(addr, None).await;
    authenticate(&mut alice).await;
    send_json(&mut alice, json!({ "type": "start", "data": {} })).await;
    assert_eq!(recv_json(&mut alice).await["type"], "session_started");

    let mut bob = connect_ws(addr, None).await;
    authenticate(&mut bob).await;
    send_json(&mut bob, json!({ "type": "start", "data": {} })).await;
    let busy = recv_json(&mut bob).await;
    assert_eq!(busy["type"], "session_busy");
    assert_eq!(busy["data"]["active_user"], "localhost-user");

    // The rejected session stays open and responsive.
    send_json(&mut bob, json!({ "type": "ping" })).await;
    assert_eq!(recv_json(&mut bob).await["type"], "pong");

    // Release: finish the first session's recording.
    send_audio(&mut alice, 16_000, &speech(31)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    send_json(&mut alice, json!({ "type": "stop" })).await;
    let flow = collect_until(&mut alice, "final").await;
    assert_eq!(flow.last().unwrap().0, "final");

    // Now bob can start (the job is released just after alice's final, so
    // allow a couple of retries).
    let mut started = false;
    for _attempt in 0..20 {
        send_json(&mut bob, json!({ "type": "start", "data": {} })).await;
        let reply = recv_json(&mut bob).await;
        if reply["type"] == "session_started" {
            started = true;
            break;
        }
        assert_eq!(reply["type"], "session_busy");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(started, "job slot was never released");
}

#[tokio::test]
async fn sub_minimum_utterance_is_discarded_with_empty_final() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, None).await;
    authenticate(&mut ws).await;

    send_json(&mut ws, json!({ "type": "start", "data": {} })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "session_started");

    // One frame ≈ 32 ms, below the 50 ms minimum.
    send_audio(&mut ws, 16_000, &speech(1)).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    send_json(&mut ws, json!({ "type": "stop" })).await;

    let flow = collect_until(&mut ws, "final").await;
    let kinds: Vec<&str> = flow.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(kinds, vec!["session_stopped", "final"]);
    assert_eq!(flow.last().unwrap().1["data"]["text"], "");
}

#[tokio::test]
async fn protocol_errors_leave_the_session_open() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, None).await;
    authenticate(&mut ws).await;

    send_json(&mut ws, json!({ "type": "reboot" })).await;
    send_json(&mut ws, json!({ "bogus": true })).await;

    send_json(&mut ws, json!({ "type": "ping" })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "pong");
}

#[tokio::test]
async fn auth_timeout_closes_the_connection() {
    let (addr, state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, None).await;

    // Say nothing; the server must drop us after auth_timeout_secs (1 s).
    let outcome = tokio::time::timeout(Duration::from_secs(4), ws.next()).await;
    match outcome {
        Ok(None) => {}
        Ok(Some(Ok(msg))) => assert!(msg.is_close(), "expected close, got {msg:?}"),
        Ok(Some(Err(_))) => {}
        Err(_) => panic!("connection was not closed after the auth timeout"),
    }
    assert!(state.sessions.is_empty(), "no session may be registered");
}

#[tokio::test]
async fn non_auth_first_message_fails_authentication() {
    let (addr, _state) = spawn_server(test_config()).await;
    let mut ws = connect_ws(addr, None).await;

    send_json(&mut ws, json!({ "type": "ping" })).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "auth_fail");
    assert_eq!(reply["data"]["message"], "Expected auth message");
}

#[tokio::test]
async fn disconnect_releases_the_job_slot() {
    let (addr, state) = spawn_server(test_config()).await;

    let mut ws = connect_ws(addr, None).await;
    authenticate(&mut ws).await;
    send_json(&mut ws, json!({ "type": "start", "data": {} })).await;
    assert_eq!(recv_json(&mut ws).await["type"], "session_started");
    assert!(state.manager.jobs().status().busy);

    drop(ws);

    // Teardown must end the held job and deregister the session.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if !state.manager.jobs().status().busy && state.sessions.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job released after disconnect");
}
