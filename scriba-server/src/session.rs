//! WebSocket session lifecycle.
//!
//! Each accepted connection gets:
//! - one **reader** (this task): dispatches text frames as control messages
//!   and binary frames as audio,
//! - one **writer** task: drains a bounded channel of outbound messages, so
//!   events reach the client in generation order and a slow client
//!   back-pressures naturally,
//! - one **recorder** with its own worker thread, owned exclusively by the
//!   session,
//! - per `start`, one **utterance pipeline** task that waits for the
//!   recorder, gates the result through the engine and answers `final`.
//!
//! Teardown runs exactly once at the end of the reader: shut the recorder
//! down, release any held job and realtime engine, deregister. A fault in
//! one session never touches another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scriba_core::audio::samples_to_f32;
use scriba_core::engine::TranscriptionResult;
use scriba_core::jobs::JobGrant;
use scriba_core::recorder::{Recorder, RecorderEvents};
use scriba_core::vad::{DualVad, VoiceGate};
use scriba_core::{
    Admission, CancelToken, EngineHandle, ModelManager, RealtimeClient, ScribaError,
    TranscribeOptions, Utterance,
};

use crate::auth::TokenIdentity;
use crate::capabilities::{Capabilities, ClientType};
use crate::protocol::{parse_binary_frame, ClientMessage, ServerMessage};
use crate::state::{unix_timestamp, AppState, SessionInfo};

/// Outbound messages buffered per connection before the writer applies
/// back-pressure to event producers.
const OUTBOUND_BUFFER: usize = 64;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Recorder event sink: forwards lifecycle events into the outbound channel.
/// VAD events are only emitted while a VAD-driven recording is active.
struct SessionEvents {
    outbound: mpsc::Sender<ServerMessage>,
    emit_vad: AtomicBool,
}

impl SessionEvents {
    fn emit(&self, message: ServerMessage) {
        if self.emit_vad.load(Ordering::SeqCst) {
            // Runs on the recorder worker thread. Lifecycle events are
            // advisory: when a slow client fills the outbound buffer they
            // are dropped rather than stalling frame processing (final
            // results go through the async path and do back-pressure).
            if self.outbound.try_send(message).is_err() {
                warn!("outbound buffer full — vad event dropped");
            }
        }
    }
}

impl RecorderEvents for SessionEvents {
    fn on_vad_start(&self) {
        self.emit(ServerMessage::VadStart);
    }

    fn on_vad_stop(&self) {
        self.emit(ServerMessage::VadStop);
    }

    fn on_recording_start(&self) {
        self.emit(ServerMessage::VadRecordingStart);
    }

    fn on_recording_stop(&self) {
        self.emit(ServerMessage::VadRecordingStop);
    }
}

/// Build the session's VAD. With the `onnx` feature and a model path in
/// `SCRIBA_SILERO_MODEL`, the neural stage confirms onsets; otherwise the
/// energy detector runs alone.
fn build_vad(state: &AppState) -> Box<dyn VoiceGate> {
    let config = state.config.vad_config();

    #[cfg(feature = "onnx")]
    {
        if let Ok(path) = std::env::var("SCRIBA_SILERO_MODEL") {
            match scriba_core::SileroVad::new(&path, config.neural_sensitivity) {
                Ok(neural) => return Box::new(DualVad::with_neural(&config, Box::new(neural))),
                Err(e) => warn!("silero vad load failed ({e}), falling back to energy vad"),
            }
        }
    }

    Box::new(DualVad::new(&config))
}

struct Session {
    id: Uuid,
    identity: TokenIdentity,
    client_type: ClientType,
    capabilities: Capabilities,
    state: AppState,
    outbound: mpsc::Sender<ServerMessage>,
    recorder: Arc<Recorder>,
    events: Arc<SessionEvents>,
    /// True between a granted `start` and the delivery of its result.
    recording: Arc<AtomicBool>,
    job: Arc<Mutex<Option<JobGrant>>>,
    language: Arc<Mutex<Option<String>>>,
}

/// Drive one authenticated-or-not connection to completion.
pub async fn run_session(
    socket: WebSocket,
    state: AppState,
    client_type: ClientType,
    is_localhost: bool,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_loop(ws_tx, outbound_rx));

    let auth_timeout = Duration::from_secs(state.config.server.auth_timeout_secs);
    let identity =
        match authenticate(&mut ws_rx, &outbound_tx, &state, is_localhost, auth_timeout).await {
            Some(identity) => identity,
            None => {
                drop(outbound_tx);
                let _ = writer.await;
                return;
            }
        };

    let session_id = Uuid::new_v4();
    let capabilities = Capabilities::for_client(client_type, state.diarization_available);
    let events = Arc::new(SessionEvents {
        outbound: outbound_tx.clone(),
        emit_vad: AtomicBool::new(false),
    });
    let recorder = Arc::new(Recorder::new(
        state.config.recorder_config(),
        build_vad(&state),
        Arc::clone(&events) as Arc<dyn RecorderEvents>,
    ));

    state.sessions.insert(
        session_id,
        SessionInfo {
            client_name: identity.client_name.clone(),
            client_type,
            connected_at: SystemTime::now(),
        },
    );
    if client_type == ClientType::Standalone {
        state.manager.on_standalone_client_connected();
    }

    let session = Session {
        id: session_id,
        identity,
        client_type,
        capabilities: capabilities.clone(),
        state: state.clone(),
        outbound: outbound_tx.clone(),
        recorder,
        events,
        recording: Arc::new(AtomicBool::new(false)),
        job: Arc::new(Mutex::new(None)),
        language: Arc::new(Mutex::new(None)),
    };

    session
        .send(ServerMessage::AuthOk {
            client_name: session.identity.client_name.clone(),
            client_type: client_type.as_str().to_string(),
            capabilities,
        })
        .await;
    info!(
        %session_id,
        client = session.identity.client_name.as_str(),
        client_type = client_type.as_str(),
        "session started"
    );

    // ── Message loop ─────────────────────────────────────────────────────
    while let Some(next) = ws_rx.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                debug!(%session_id, "websocket error: {e}");
                break;
            }
        };
        match message {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Binary(bytes) => session.handle_binary(&bytes),
            Message::Close(_) => break,
            // Ping/pong control frames are answered by axum itself.
            _ => {}
        }
    }

    // ── Teardown (exactly once, idempotent building blocks) ──────────────
    info!(%session_id, client = session.identity.client_name.as_str(), "session ending");
    session.recorder.shutdown();
    release_job(&state.manager, &session.job);
    state.manager.release_realtime_engine(session_id);
    if client_type == ClientType::Standalone {
        state.manager.on_standalone_client_disconnected();
    }
    state.sessions.remove(session_id);

    drop(session);
    drop(outbound_tx);
    let _ = writer.await;
}

/// Writer task: single consumer of the outbound channel; preserves
/// generation order per connection.
async fn write_loop(mut ws_tx: WsSink, mut outbound_rx: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = outbound_rx.recv().await {
        let frame = message.to_envelope_json(unix_timestamp());
        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// Await and validate the `auth` message. `None` means the connection must
/// close (a reason was already queued when applicable).
async fn authenticate(
    ws_rx: &mut WsStream,
    outbound: &mpsc::Sender<ServerMessage>,
    state: &AppState,
    is_localhost: bool,
    timeout: Duration,
) -> Option<TokenIdentity> {
    let raw = match tokio::time::timeout(timeout, next_text_frame(ws_rx)).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("connection closed before auth");
            return None;
        }
        Err(_) => {
            warn!("authentication timeout");
            return None;
        }
    };

    let token = match ClientMessage::parse(&raw) {
        Ok(ClientMessage::Auth { token }) => token,
        Ok(other) => {
            debug!(?other, "expected auth message");
            auth_fail(outbound, "Expected auth message").await;
            return None;
        }
        Err(e) => {
            debug!("unparseable auth frame: {e}");
            auth_fail(outbound, "Expected auth message").await;
            return None;
        }
    };

    if is_localhost {
        info!("localhost connection — bypassing token validation");
        return Some(TokenIdentity::localhost());
    }

    let Some(token) = token else {
        auth_fail(outbound, "No token provided").await;
        return None;
    };

    match state.tokens.validate(&token) {
        Some(identity) => Some(identity),
        None => {
            auth_fail(outbound, "Invalid or revoked token").await;
            None
        }
    }
}

async fn auth_fail(outbound: &mpsc::Sender<ServerMessage>, message: &str) {
    let _ = outbound
        .send(ServerMessage::AuthFail {
            message: message.to_string(),
        })
        .await;
}

async fn next_text_frame(ws_rx: &mut WsStream) -> Option<String> {
    while let Some(next) = ws_rx.next().await {
        match next {
            Ok(Message::Text(text)) => return Some(text.to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

fn release_job(manager: &ModelManager, job: &Mutex<Option<JobGrant>>) {
    if let Some(grant) = job.lock().take() {
        manager.jobs().end(grant.job_id);
    }
}

impl Session {
    async fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message).await;
    }

    async fn handle_text(&self, raw: &str) {
        match ClientMessage::parse(raw) {
            Ok(ClientMessage::Start { language, use_vad }) => {
                self.handle_start(language, use_vad).await;
            }
            Ok(ClientMessage::Stop) => self.handle_stop(),
            Ok(ClientMessage::Ping) => self.send(ServerMessage::Pong).await,
            Ok(ClientMessage::GetCapabilities) => {
                self.send(ServerMessage::Capabilities(self.capabilities.clone()))
                    .await;
            }
            Ok(ClientMessage::Auth { .. }) => debug!("duplicate auth ignored"),
            Err(e) => warn!("protocol error ignored: {e}"),
        }
    }

    async fn handle_start(&self, language: Option<String>, use_vad: bool) {
        if self.recording.load(Ordering::SeqCst) {
            self.send(ServerMessage::Error {
                message: "Recording already in progress".into(),
            })
            .await;
            return;
        }

        let grant = match self.state.manager.jobs().try_start(&self.identity.client_name) {
            Admission::Granted(grant) => grant,
            Admission::Busy { active_user } => {
                info!(
                    client = self.identity.client_name.as_str(),
                    active_user = active_user.as_str(),
                    "recording rejected — job already running"
                );
                self.send(ServerMessage::SessionBusy { active_user }).await;
                return;
            }
        };
        *self.job.lock() = Some(grant);

        let language = language.or_else(|| self.state.config.default_language());
        *self.language.lock() = language.clone();

        let vad_enabled = use_vad && self.capabilities.supports_vad_events;
        self.events.emit_vad.store(vad_enabled, Ordering::SeqCst);

        let live_engine = if vad_enabled
            && self.capabilities.supports_preview
            && self.state.manager.live_enabled()
        {
            match self.state.manager.get_or_create_realtime_engine(
                self.id,
                match self.client_type {
                    ClientType::Standalone => RealtimeClient::Standalone,
                    ClientType::Web => RealtimeClient::Web,
                },
                language.as_deref(),
            ) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    warn!("live engine unavailable, preview disabled: {e}");
                    None
                }
            }
        } else {
            None
        };
        let preview_enabled = live_engine.is_some();

        self.recording.store(true, Ordering::SeqCst);
        if vad_enabled {
            self.recorder.listen();
        } else {
            self.recorder.start();
        }

        self.spawn_utterance_pipeline();
        if let Some(engine) = live_engine {
            self.spawn_preview(engine);
        }

        info!(
            client = self.identity.client_name.as_str(),
            vad_enabled, preview_enabled, "recording started"
        );
        self.send(ServerMessage::SessionStarted {
            vad_enabled,
            preview_enabled,
        })
        .await;
    }

    fn handle_stop(&self) {
        if self.recording.load(Ordering::SeqCst) {
            self.recorder.stop();
        } else {
            debug!("stop ignored: no recording in progress");
        }
    }

    fn handle_binary(&self, frame: &[u8]) {
        match parse_binary_frame(frame) {
            Ok((meta, pcm)) => {
                if !self.recording.load(Ordering::SeqCst) {
                    debug!("audio received while not recording, dropped");
                    return;
                }
                self.recorder.feed_audio(pcm, meta.sample_rate);
            }
            Err(e) => warn!("bad binary frame ignored: {e}"),
        }
    }

    /// One per `start`: wait for the recorder's utterance, answer
    /// `session_stopped`, run the engine under the held job, answer `final`.
    fn spawn_utterance_pipeline(&self) {
        let recorder = Arc::clone(&self.recorder);
        let outbound = self.outbound.clone();
        let manager = Arc::clone(&self.state.manager);
        let job = Arc::clone(&self.job);
        let recording = Arc::clone(&self.recording);
        let events = Arc::clone(&self.events);
        let language = self.language.lock().clone();
        let min_utterance = self.state.config.main_transcriber.min_length_of_recording;

        tokio::spawn(async move {
            let waiter = {
                let recorder = Arc::clone(&recorder);
                tokio::task::spawn_blocking(move || recorder.wait_utterance())
            };
            let utterance = match waiter.await {
                Ok(utterance) => utterance,
                Err(e) => {
                    error!("utterance waiter failed: {e}");
                    None
                }
            };

            recording.store(false, Ordering::SeqCst);
            events.emit_vad.store(false, Ordering::SeqCst);

            let Some(utterance) = utterance else {
                if recorder.is_shut_down() {
                    // Session teardown; nothing to answer.
                } else {
                    error!("recorder worker died mid-session");
                    let _ = outbound
                        .send(ServerMessage::Error {
                            message: "Recording failed".into(),
                        })
                        .await;
                }
                release_job(&manager, &job);
                return;
            };

            let _ = outbound.send(ServerMessage::SessionStopped).await;

            if utterance.duration_secs() < min_utterance {
                info!(
                    duration_secs = utterance.duration_secs(),
                    "utterance below minimum length — discarded without engine call"
                );
                let _ = outbound
                    .send(ServerMessage::final_from(&TranscriptionResult::empty()))
                    .await;
                release_job(&manager, &job);
                return;
            }

            let grant = job.lock().clone();
            let Some(grant) = grant else {
                warn!("utterance completed without a held job, dropping");
                return;
            };

            recorder.mark_transcribing();
            let outcome = transcribe(&manager, utterance, language, grant.cancel.clone()).await;
            recorder.mark_inactive();

            match outcome {
                Ok(result) => {
                    info!(
                        text_chars = result.text.len(),
                        duration_secs = result.duration,
                        "transcription complete"
                    );
                    let _ = outbound.send(ServerMessage::final_from(&result)).await;
                }
                Err(ScribaError::Cancelled) => {
                    info!("transcription cancelled cooperatively");
                }
                Err(e) => {
                    error!("transcription failed: {e}");
                    let _ = outbound
                        .send(ServerMessage::Error {
                            message: format!("Transcription failed: {e}"),
                        })
                        .await;
                }
            }
            release_job(&manager, &job);
        });
    }

    /// Best-effort live preview: periodically run the live engine over the
    /// in-progress utterance and push `preview` text. Throttled; never
    /// emitted after the utterance's `final`.
    fn spawn_preview(&self, engine: EngineHandle) {
        let recorder = Arc::clone(&self.recorder);
        let recording = Arc::clone(&self.recording);
        let outbound = self.outbound.clone();
        let language = self.language.lock().clone();
        let interval =
            Duration::from_secs_f64(self.state.config.live_transcriber.preview_interval_secs.max(0.1));

        tokio::spawn(async move {
            let mut last_len = 0usize;
            let mut last_text = String::new();

            while recording.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !recording.load(Ordering::SeqCst) {
                    break;
                }

                let audio = recorder.current_audio();
                if audio.len() < 8_000 || audio.len() == last_len {
                    continue;
                }
                last_len = audio.len();

                let engine = engine.clone();
                let opts = TranscribeOptions {
                    language: language.clone(),
                    word_timestamps: false,
                    partial: true,
                };
                let result = tokio::task::spawn_blocking(move || {
                    let samples = samples_to_f32(&audio);
                    engine.0.lock().transcribe(&samples, &opts, &CancelToken::new())
                })
                .await;

                if let Ok(Ok(result)) = result {
                    if !result.text.is_empty()
                        && result.text != last_text
                        && recording.load(Ordering::SeqCst)
                    {
                        last_text = result.text.clone();
                        let _ = outbound
                            .send(ServerMessage::Preview { text: result.text })
                            .await;
                    }
                }
            }
            debug!("preview loop ended");
        });
    }
}

async fn transcribe(
    manager: &ModelManager,
    utterance: Utterance,
    language: Option<String>,
    cancel: CancelToken,
) -> Result<TranscriptionResult, ScribaError> {
    let engine = manager.file_engine()?;
    let handle = tokio::task::spawn_blocking(move || {
        let audio = utterance.to_f32();
        let opts = TranscribeOptions {
            language,
            word_timestamps: true,
            partial: false,
        };
        engine.0.lock().transcribe(&audio, &opts, &cancel)
    });
    handle
        .await
        .map_err(|e| ScribaError::Engine(format!("transcription task died: {e}")))?
}
