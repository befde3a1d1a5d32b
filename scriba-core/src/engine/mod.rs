//! Speech and diarization engine abstractions.
//!
//! The model libraries themselves are external collaborators: this crate
//! only defines the contracts through which they are consumed, plus a
//! deterministic stub backend used in development and tests.
//!
//! `&mut self` on `transcribe` intentionally expresses that decoders are
//! stateful — beam caches, language-detection state. All mutation is
//! serialized through [`EngineHandle`]'s `parking_lot::Mutex`.

pub mod diarize;
pub mod stub;
pub mod types;

pub use diarize::{DiarizationEngine, DiarizerHandle};
pub use types::{Segment, SpeakerSegment, TranscriptionResult, Word};

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::jobs::CancelToken;

/// Static engine construction parameters, resolved from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Model identifier (e.g. `Systran/faster-whisper-large-v3`).
    pub model: String,
    /// `cuda` or `cpu`.
    pub device: String,
    /// Numeric precision hint passed through to the backend.
    pub compute_type: String,
    pub beam_size: u32,
    pub batch_size: u32,
    /// Default language; empty means auto-detect.
    pub language: String,
    pub initial_prompt: Option<String>,
    /// Peak-normalize audio to 0.95 before inference.
    pub normalize_audio: bool,
    pub ensure_sentence_starting_uppercase: bool,
    pub ensure_sentence_ends_with_period: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: "Systran/faster-whisper-large-v3".into(),
            device: "cuda".into(),
            compute_type: "default".into(),
            beam_size: 5,
            batch_size: 16,
            language: String::new(),
            initial_prompt: None,
            normalize_audio: false,
            ensure_sentence_starting_uppercase: true,
            ensure_sentence_ends_with_period: true,
        }
    }
}

/// Per-call transcription options.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    /// Override language; `None` falls back to the engine default / auto.
    pub language: Option<String>,
    pub word_timestamps: bool,
    /// Streaming preview request — the backend may return a cheaper,
    /// lower-confidence hypothesis.
    pub partial: bool,
}

/// Contract for speech recognition backends.
pub trait SpeechEngine: Send + 'static {
    fn model_name(&self) -> &str;

    fn is_loaded(&self) -> bool;

    /// Load weights and run a short warmup inference. `progress` receives
    /// human-readable status lines (model downloads can take minutes).
    fn load(&mut self, progress: &mut dyn FnMut(&str)) -> Result<()>;

    /// Release weights and GPU memory. Idempotent.
    fn unload(&mut self);

    /// Transcribe mono f32 audio at 16 kHz.
    ///
    /// Implementations load lazily on first use, must poll `cancel` at
    /// least once per produced segment, and return
    /// [`ScribaError::Cancelled`](crate::ScribaError::Cancelled) once it
    /// reads true — leaving no model state partially mutated.
    fn transcribe(
        &mut self,
        audio: &[f32],
        opts: &TranscribeOptions,
        cancel: &CancelToken,
    ) -> Result<TranscriptionResult>;
}

/// Thread-safe reference-counted handle to any [`SpeechEngine`].
///
/// Two handles compare equal under [`same_instance`](Self::same_instance)
/// when they alias the same loaded model — the mechanism behind engine
/// sharing between the file path and per-session realtime slots.
#[derive(Clone)]
pub struct EngineHandle(pub Arc<Mutex<dyn SpeechEngine>>);

impl EngineHandle {
    pub fn new<E: SpeechEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }

    /// Whether both handles point at the same underlying engine.
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

/// Final text cleanup applied by engines before returning a result.
pub fn polish_text(text: &str, uppercase_start: bool, ensure_period: bool) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if uppercase_start {
        let mut chars = out.chars();
        if let Some(first) = chars.next() {
            out = first.to_uppercase().collect::<String>() + chars.as_str();
        }
    }

    if ensure_period {
        if let Some(last) = out.chars().last() {
            if last.is_alphanumeric() {
                out.push('.');
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polish_collapses_whitespace_and_punctuates() {
        assert_eq!(polish_text("  hello   world ", true, true), "Hello world.");
    }

    #[test]
    fn polish_respects_disabled_flags() {
        assert_eq!(polish_text("hello world", false, false), "hello world");
    }

    #[test]
    fn polish_leaves_existing_punctuation() {
        assert_eq!(polish_text("done!", true, true), "Done!");
    }

    #[test]
    fn polish_handles_empty_input() {
        assert_eq!(polish_text("", true, true), "");
    }

    #[test]
    fn handles_alias_detection() {
        let a = EngineHandle::new(stub::StubEngine::new("m"));
        let b = a.clone();
        let c = EngineHandle::new(stub::StubEngine::new("m"));
        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
    }
}
