//! Result types shared by engines and the wire protocol.

use serde::{Deserialize, Serialize};

/// A single word with timing, flattened across segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Word {
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub probability: f32,
}

/// One recognized segment of the utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<Word>>,
}

/// Full transcription output for one audio buffer.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptionResult {
    pub text: String,
    pub language: Option<String>,
    pub language_probability: f32,
    pub duration: f64,
    pub segments: Vec<Segment>,
    pub words: Vec<Word>,
}

impl TranscriptionResult {
    /// The empty result returned for discarded (sub-minimum) utterances.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One speaker-attributed span from the diarization engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakerSegment {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_serializes_with_snake_case_fields() {
        let result = TranscriptionResult {
            text: "hello world".into(),
            language: Some("en".into()),
            language_probability: 0.98,
            duration: 3.2,
            segments: vec![Segment {
                text: "hello world".into(),
                start: 0.1,
                end: 3.1,
                words: Some(vec![Word {
                    word: "hello".into(),
                    start: 0.1,
                    end: 0.4,
                    probability: 0.99,
                }]),
            }],
            words: vec![Word {
                word: "hello".into(),
                start: 0.1,
                end: 0.4,
                probability: 0.99,
            }],
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["text"], "hello world");
        assert_eq!(json["language"], "en");
        assert_eq!(json["segments"][0]["words"][0]["word"], "hello");
        let lp = json["language_probability"].as_f64().unwrap();
        assert!((lp - 0.98).abs() < 1e-5);
    }

    #[test]
    fn segment_without_words_omits_the_field() {
        let segment = Segment {
            text: "x".into(),
            start: 0.0,
            end: 1.0,
            words: None,
        };
        let json = serde_json::to_value(&segment).unwrap();
        assert!(json.get("words").is_none());
    }
}
