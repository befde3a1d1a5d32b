//! # scriba-core
//!
//! Streaming speech-to-text pipeline core for the Scriba server.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket audio → Recorder::feed_audio → SPSC RingBuffer → worker thread
//!                                                │
//!                                          DualVad decision
//!                                                │
//!                                       Utterance (crossbeam channel)
//!                                                │
//!                        ModelManager engine slot ── JobTracker gate
//! ```
//!
//! The feed path is non-blocking. All buffering, VAD and state-machine work
//! happens on the recorder's own worker thread; heavy model work happens on
//! whatever thread holds the engine lock.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod manager;
pub mod recorder;
pub mod vad;

// Convenience re-exports for downstream crates
pub use engine::{
    DiarizationEngine, DiarizerHandle, EngineHandle, EngineSettings, SpeechEngine,
    TranscribeOptions, TranscriptionResult,
};
pub use error::ScribaError;
pub use jobs::{Admission, CancelToken, JobTracker};
pub use manager::{
    EngineFactory, LiveEngineSettings, ManagerConfig, ModelManager, RealtimeClient, StubFactory,
};
pub use recorder::{Recorder, RecorderConfig, RecorderEvents, RecorderState, Utterance};
pub use vad::{DualVad, VadConfig, VoiceGate};

#[cfg(feature = "onnx")]
pub use vad::SileroVad;
