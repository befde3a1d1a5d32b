//! Stub backends — deterministic placeholders with no real inference.
//!
//! Used in development and tests so the full session/protocol pipeline can
//! be exercised end-to-end without model weights. The stub transcriber
//! reports the audio it received; the stub diarizer attributes everything
//! to one speaker.

use tracing::debug;

use crate::audio::SAMPLE_RATE;
use crate::error::{Result, ScribaError};
use crate::jobs::CancelToken;

use super::types::{Segment, SpeakerSegment, TranscriptionResult, Word};
use super::{polish_text, DiarizationEngine, SpeechEngine, TranscribeOptions};

/// Echo-style stub transcriber.
///
/// For every non-trivial buffer it emits one segment describing the audio:
/// `"[scriba stub: <N> samples, <D>s]"`, with a single covering word when
/// word timestamps are requested.
pub struct StubEngine {
    model: String,
    loaded: bool,
    utterance_count: u32,
}

impl StubEngine {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            loaded: false,
            utterance_count: 0,
        }
    }
}

impl SpeechEngine for StubEngine {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load(&mut self, progress: &mut dyn FnMut(&str)) -> Result<()> {
        progress("loading stub model");
        self.loaded = true;
        progress("stub model ready");
        Ok(())
    }

    fn unload(&mut self) {
        debug!("StubEngine::unload");
        self.loaded = false;
    }

    fn transcribe(
        &mut self,
        audio: &[f32],
        opts: &TranscribeOptions,
        cancel: &CancelToken,
    ) -> Result<TranscriptionResult> {
        if !self.loaded {
            let mut sink = |_: &str| {};
            self.load(&mut sink)?;
        }

        if cancel.is_cancelled() {
            return Err(ScribaError::Cancelled);
        }

        if audio.len() < 160 {
            return Ok(TranscriptionResult::empty());
        }

        self.utterance_count += 1;
        let duration = audio.len() as f64 / f64::from(SAMPLE_RATE);
        let text = if opts.partial {
            "\u{2026}".to_string()
        } else {
            polish_text(
                &format!("[scriba stub: {} samples, {:.2}s]", audio.len(), duration),
                false,
                false,
            )
        };

        let words = if opts.word_timestamps && !opts.partial {
            vec![Word {
                word: text.clone(),
                start: 0.0,
                end: duration,
                probability: 1.0,
            }]
        } else {
            Vec::new()
        };

        Ok(TranscriptionResult {
            text: text.clone(),
            language: Some(
                opts.language
                    .clone()
                    .unwrap_or_else(|| "en".to_string()),
            ),
            language_probability: 1.0,
            duration,
            segments: vec![Segment {
                text,
                start: 0.0,
                end: duration,
                words: if words.is_empty() {
                    None
                } else {
                    Some(words.clone())
                },
            }],
            words,
        })
    }
}

/// Single-speaker stub diarizer.
pub struct StubDiarizer {
    model: String,
    loaded: bool,
}

impl StubDiarizer {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            loaded: false,
        }
    }
}

impl DiarizationEngine for StubDiarizer {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn load(&mut self) -> Result<()> {
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        self.loaded = false;
    }

    fn diarize(&mut self, audio: &[f32], cancel: &CancelToken) -> Result<Vec<SpeakerSegment>> {
        if cancel.is_cancelled() {
            return Err(ScribaError::Cancelled);
        }
        if audio.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![SpeakerSegment {
            speaker: "SPEAKER_00".into(),
            start: 0.0,
            end: audio.len() as f64 / f64::from(SAMPLE_RATE),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_reports_sample_count_and_duration() {
        let mut engine = StubEngine::new("stub");
        let cancel = CancelToken::new();
        let audio = vec![0.1f32; 32_000];
        let result = engine
            .transcribe(
                &audio,
                &TranscribeOptions {
                    word_timestamps: true,
                    ..Default::default()
                },
                &cancel,
            )
            .unwrap();

        assert!(result.text.contains("32000 samples"));
        assert!((result.duration - 2.0).abs() < 1e-6);
        assert_eq!(result.words.len(), 1);
        assert!(engine.is_loaded(), "transcribe loads lazily");
    }

    #[test]
    fn trivial_audio_yields_empty_result() {
        let mut engine = StubEngine::new("stub");
        let result = engine
            .transcribe(&[0.0; 10], &TranscribeOptions::default(), &CancelToken::new())
            .unwrap();
        assert!(result.text.is_empty());
        assert!(result.segments.is_empty());
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let mut engine = StubEngine::new("stub");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = engine
            .transcribe(&vec![0.1; 32_000], &TranscribeOptions::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, ScribaError::Cancelled));
    }

    #[test]
    fn partial_requests_get_the_ellipsis_preview() {
        let mut engine = StubEngine::new("stub");
        let result = engine
            .transcribe(
                &vec![0.1; 32_000],
                &TranscribeOptions {
                    partial: true,
                    ..Default::default()
                },
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(result.text, "\u{2026}");
    }
}
