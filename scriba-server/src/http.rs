//! HTTP endpoints: file transcription, cancellation, status.
//!
//! `POST /api/transcribe/audio` accepts a multipart upload, converts it to
//! 16 kHz mono int16 (written to a scoped temp WAV that is removed on every
//! exit path), gates through the job tracker and runs the shared file
//! engine. A concurrent `POST /api/transcribe/cancel` flips the job's
//! cancellation token; the engine's cooperative poll turns that into a 499
//! here.

use std::io::Cursor;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info, warn};

use scriba_core::audio::wav::{decode_to_pipeline_rate, write_wav};
use scriba_core::audio::{normalize_peak, samples_to_f32};
use scriba_core::engine::TranscriptionResult;
use scriba_core::{Admission, CancelToken, ScribaError, TranscribeOptions};

use crate::auth::TokenIdentity;
use crate::state::AppState;

/// Client-closed-request, used when cancellation lands mid-transcription.
fn status_client_closed() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

/// Resolve the caller's identity: loopback bypasses the token store,
/// everyone else presents `Authorization: Bearer <token>`.
fn authorize(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> Option<TokenIdentity> {
    if addr.ip().is_loopback() {
        return Some(TokenIdentity::localhost());
    }
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))?;
    state.tokens.validate(token)
}

/// `POST /api/transcribe/audio`
pub async fn transcribe_audio(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let Some(identity) = authorize(&state, &headers, addr) else {
        return detail(StatusCode::UNAUTHORIZED, "Invalid or missing token");
    };

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut language: Option<String> = None;
    let mut word_timestamps = true;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return detail(StatusCode::BAD_REQUEST, format!("bad multipart body: {e}")),
        };
        match field.name() {
            Some("file") => match field.bytes().await {
                Ok(bytes) => file_bytes = Some(bytes.to_vec()),
                Err(e) => {
                    return detail(StatusCode::BAD_REQUEST, format!("failed to read file: {e}"))
                }
            },
            Some("language") => {
                if let Ok(text) = field.text().await {
                    let text = text.trim().to_string();
                    if !text.is_empty() {
                        language = Some(text);
                    }
                }
            }
            Some("word_timestamps") => {
                if let Ok(text) = field.text().await {
                    word_timestamps = matches!(text.trim(), "true" | "1" | "yes");
                }
            }
            _ => {}
        }
    }

    let Some(file_bytes) = file_bytes else {
        return detail(StatusCode::BAD_REQUEST, "missing 'file' field");
    };

    let grant = match state.manager.jobs().try_start(&identity.client_name) {
        Admission::Granted(grant) => grant,
        Admission::Busy { active_user } => {
            info!(
                client = identity.client_name.as_str(),
                active_user = active_user.as_str(),
                "upload rejected — transcription already running"
            );
            return detail(
                StatusCode::CONFLICT,
                format!("A transcription is already running for {active_user}"),
            );
        }
    };

    let language = language.or_else(|| state.config.default_language());
    let outcome = run_file_transcription(
        &state,
        file_bytes,
        language,
        word_timestamps,
        grant.cancel.clone(),
    )
    .await;
    state.manager.jobs().end(grant.job_id);

    match outcome {
        Ok(result) => {
            info!(
                client = identity.client_name.as_str(),
                duration_secs = result.duration,
                "file transcription complete"
            );
            Json(result).into_response()
        }
        Err(ScribaError::Cancelled) => {
            info!(
                client = identity.client_name.as_str(),
                "file transcription cancelled"
            );
            detail(status_client_closed(), "Transcription cancelled")
        }
        Err(ScribaError::AudioFormat(msg)) => {
            warn!("upload rejected: {msg}");
            detail(StatusCode::BAD_REQUEST, msg)
        }
        Err(e) => {
            error!("file transcription failed: {e}");
            detail(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Transcription failed: {e}"),
            )
        }
    }
}

async fn run_file_transcription(
    state: &AppState,
    file_bytes: Vec<u8>,
    language: Option<String>,
    word_timestamps: bool,
    cancel: CancelToken,
) -> Result<TranscriptionResult, ScribaError> {
    let engine = state.manager.file_engine()?;
    let normalize = state.config.main_transcriber.normalize_audio;

    let handle = tokio::task::spawn_blocking(move || {
        let samples = decode_to_pipeline_rate(Cursor::new(&file_bytes))?;

        // Scoped working copy at the pipeline rate; deleted when `working`
        // drops, on the success and failure paths alike.
        let working = tempfile::Builder::new()
            .prefix("scriba-upload-")
            .suffix(".wav")
            .tempfile()?;
        write_wav(working.path(), &samples)?;

        let mut audio = samples_to_f32(&samples);
        if normalize {
            normalize_peak(&mut audio, 0.95);
        }

        let opts = TranscribeOptions {
            language,
            word_timestamps,
            partial: false,
        };
        engine.0.lock().transcribe(&audio, &opts, &cancel)
    });

    handle
        .await
        .map_err(|e| ScribaError::Engine(format!("transcription task died: {e}")))?
}

/// `POST /api/transcribe/cancel` — admin only (loopback counts as admin).
pub async fn cancel_transcription(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(identity) = authorize(&state, &headers, addr) else {
        return detail(StatusCode::UNAUTHORIZED, "Invalid or missing token");
    };
    if !identity.is_admin {
        return detail(StatusCode::FORBIDDEN, "Admin token required");
    }

    match state.manager.jobs().cancel() {
        Some(user) => Json(json!({
            "success": true,
            "cancelled_user": user,
            "message": format!("Cancellation requested for {user}"),
        }))
        .into_response(),
        None => Json(json!({
            "success": false,
            "cancelled_user": null,
            "message": "No transcription is currently running",
        }))
        .into_response(),
    }
}

/// `GET /api/status` — model/job snapshot; admin only.
pub async fn status(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let Some(identity) = authorize(&state, &headers, addr) else {
        return detail(StatusCode::UNAUTHORIZED, "Invalid or missing token");
    };
    if !identity.is_admin {
        return detail(StatusCode::FORBIDDEN, "Admin token required");
    }

    let mut value = serde_json::to_value(state.manager.status()).unwrap_or(json!({}));
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "connected_sessions".into(),
            json!(state.sessions.len()),
        );
    }
    Json(value).into_response()
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}
