//! # scriba-server
//!
//! Transport layer of the Scriba transcription server: WebSocket sessions,
//! HTTP file transcription, authentication and configuration. The streaming
//! pipeline itself (recorder, VAD, jobs, models) lives in `scriba-core`.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod auth;
pub mod capabilities;
pub mod config;
pub mod http;
pub mod protocol;
pub mod session;
pub mod state;
pub mod ws;

use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use scriba_core::{EngineFactory, ModelManager};

use crate::auth::TokenStore;
use crate::config::ServerConfig;
use crate::state::{AppState, SessionTable};

/// Assemble the shared state from a loaded config and an engine factory.
pub fn build_state(config: ServerConfig, factory: Box<dyn EngineFactory>) -> AppState {
    let tokens = TokenStore::load(Path::new(&config.server.tokens_file));
    let manager = ModelManager::new(config.manager_config(), factory);
    let diarization_available =
        config.diarization.model.is_some() && std::env::var("HF_TOKEN").is_ok();

    AppState {
        config: Arc::new(config),
        manager: Arc::new(manager),
        tokens: Arc::new(tokens),
        sessions: Arc::new(SessionTable::new()),
        diarization_available,
    }
}

/// The full HTTP/WebSocket surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_upgrade))
        .route("/api/transcribe/audio", post(http::transcribe_audio))
        .route("/api/transcribe/cancel", post(http::cancel_transcription))
        .route("/api/status", get(http::status))
        .route("/healthz", get(http::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
