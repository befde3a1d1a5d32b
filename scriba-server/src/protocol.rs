//! WebSocket wire protocol.
//!
//! Text frames are JSON envelopes `{"type", "data", "timestamp"}`. They are
//! decoded exactly once, at this boundary, into the [`ClientMessage`] sum
//! type; unknown tags and malformed payloads become [`ProtocolError`]s that
//! the session logs and ignores — never panics, never closed connections.
//!
//! Binary frames carry audio:
//! `[u32 LE: metadata length N][N bytes UTF-8 JSON metadata][PCM int16 LE]`.
//! The metadata is advisory; its `sample_rate` drives server-side
//! resampling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use scriba_core::engine::TranscriptionResult;

use crate::capabilities::Capabilities;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing message type")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("binary frame too short ({0} bytes)")]
    ShortBinaryFrame(usize),

    #[error("binary frame metadata length {meta_len} exceeds frame size {frame_len}")]
    TruncatedBinaryFrame { meta_len: usize, frame_len: usize },

    #[error("binary frame metadata is not valid JSON")]
    BadMetadata,
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Auth { token: Option<String> },
    Start { language: Option<String>, use_vad: bool },
    Stop,
    Ping,
    GetCapabilities,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AuthData {
    token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct StartData {
    language: Option<String>,
    use_vad: bool,
}

impl ClientMessage {
    /// Decode one text frame.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        let kind = envelope.kind.ok_or(ProtocolError::MissingType)?;
        let data = envelope.data.unwrap_or(Value::Null);

        match kind.as_str() {
            "auth" => {
                let payload: AuthData = deserialize_data(data)?;
                Ok(Self::Auth {
                    token: payload.token,
                })
            }
            "start" => {
                let payload: StartData = deserialize_data(data)?;
                Ok(Self::Start {
                    language: payload.language.filter(|l| !l.trim().is_empty()),
                    use_vad: payload.use_vad,
                })
            }
            "stop" => Ok(Self::Stop),
            "ping" => Ok(Self::Ping),
            "get_capabilities" => Ok(Self::GetCapabilities),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn deserialize_data<T: for<'de> Deserialize<'de> + Default>(
    data: Value,
) -> Result<T, ProtocolError> {
    if data.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(data)?)
}

/// Messages the server emits. Serialized adjacently tagged
/// (`type` / `data`), then wrapped in an envelope with a timestamp.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk {
        client_name: String,
        client_type: String,
        capabilities: Capabilities,
    },
    AuthFail {
        message: String,
    },
    SessionStarted {
        vad_enabled: bool,
        preview_enabled: bool,
    },
    SessionStopped,
    SessionBusy {
        active_user: String,
    },
    VadStart,
    VadStop,
    VadRecordingStart,
    VadRecordingStop,
    Final {
        text: String,
        words: Value,
        language: Option<String>,
        duration: f64,
    },
    Preview {
        text: String,
    },
    Pong,
    Capabilities(Capabilities),
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Build the `final` message from an engine result.
    pub fn final_from(result: &TranscriptionResult) -> Self {
        Self::Final {
            text: result.text.clone(),
            words: serde_json::to_value(&result.words).unwrap_or(Value::Array(Vec::new())),
            language: result.language.clone(),
            duration: result.duration,
        }
    }

    /// Serialize as the wire envelope with the given unix timestamp.
    pub fn to_envelope_json(&self, timestamp: f64) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "type": "error", "data": { "message": "serialization failure" } })
        });
        if let Value::Object(map) = &mut value {
            map.entry("data").or_insert_with(|| Value::Object(Default::default()));
            map.insert("timestamp".into(), serde_json::json!(timestamp));
        }
        value.to_string()
    }
}

/// Advisory metadata prefixed to each binary audio frame.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioFrameMeta {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_sample_rate() -> u32 {
    16_000
}

/// Split a binary frame into its metadata and PCM payload.
pub fn parse_binary_frame(frame: &[u8]) -> Result<(AudioFrameMeta, &[u8]), ProtocolError> {
    if frame.len() < 4 {
        return Err(ProtocolError::ShortBinaryFrame(frame.len()));
    }
    let meta_len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let rest = &frame[4..];
    if meta_len > rest.len() {
        return Err(ProtocolError::TruncatedBinaryFrame {
            meta_len,
            frame_len: frame.len(),
        });
    }

    let meta: AudioFrameMeta =
        serde_json::from_slice(&rest[..meta_len]).map_err(|_| ProtocolError::BadMetadata)?;
    Ok((meta, &rest[meta_len..]))
}

/// Frame PCM bytes for transmission (client side of the convention; used by
/// the tests).
pub fn encode_binary_frame(sample_rate: u32, pcm: &[u8]) -> Vec<u8> {
    let meta = serde_json::json!({ "sample_rate": sample_rate }).to_string();
    let mut frame = Vec::with_capacity(4 + meta.len() + pcm.len());
    frame.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    frame.extend_from_slice(meta.as_bytes());
    frame.extend_from_slice(pcm);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ClientType;

    #[test]
    fn parses_auth_with_token() {
        let msg = ClientMessage::parse(r#"{"type":"auth","data":{"token":"T-alice"}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Auth {
                token: Some("T-alice".into())
            }
        );
    }

    #[test]
    fn parses_auth_without_data() {
        let msg = ClientMessage::parse(r#"{"type":"auth"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Auth { token: None });
    }

    #[test]
    fn parses_start_with_defaults() {
        let msg = ClientMessage::parse(r#"{"type":"start","data":{}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Start {
                language: None,
                use_vad: false
            }
        );

        let msg =
            ClientMessage::parse(r#"{"type":"start","data":{"language":"en","use_vad":true}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Start {
                language: Some("en".into()),
                use_vad: true
            }
        );
    }

    #[test]
    fn empty_language_becomes_auto_detect() {
        let msg = ClientMessage::parse(r#"{"type":"start","data":{"language":"  "}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Start {
                language: None,
                use_vad: false
            }
        );
    }

    #[test]
    fn unit_messages_parse_without_data() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"stop","data":{}}"#).unwrap(),
            ClientMessage::Stop
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"get_capabilities"}"#).unwrap(),
            ClientMessage::GetCapabilities
        );
    }

    #[test]
    fn unknown_tag_is_a_protocol_error() {
        let err = ClientMessage::parse(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "reboot"));

        let err = ClientMessage::parse(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));

        assert!(ClientMessage::parse("not json").is_err());
    }

    #[test]
    fn server_message_envelope_shape() {
        let json = ServerMessage::Pong.to_envelope_json(12.5);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["data"].is_object());
        assert_eq!(value["timestamp"], 12.5);

        let json = ServerMessage::SessionBusy {
            active_user: "alice".into(),
        }
        .to_envelope_json(1.0);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "session_busy");
        assert_eq!(value["data"]["active_user"], "alice");
    }

    #[test]
    fn capabilities_message_embeds_the_record() {
        let caps = Capabilities::for_client(ClientType::Standalone, false);
        let json = ServerMessage::Capabilities(caps).to_envelope_json(0.0);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "capabilities");
        assert_eq!(value["data"]["supports_vad_events"], true);
    }

    #[test]
    fn binary_frame_round_trip() {
        let pcm: Vec<u8> = vec![1, 2, 3, 4];
        let frame = encode_binary_frame(48_000, &pcm);
        let (meta, payload) = parse_binary_frame(&frame).unwrap();
        assert_eq!(meta.sample_rate, 48_000);
        assert_eq!(payload, pcm.as_slice());
    }

    #[test]
    fn binary_frame_errors_are_specific() {
        assert!(matches!(
            parse_binary_frame(&[1, 2]),
            Err(ProtocolError::ShortBinaryFrame(2))
        ));

        let mut frame = Vec::new();
        frame.extend_from_slice(&100u32.to_le_bytes());
        frame.extend_from_slice(b"{}");
        assert!(matches!(
            parse_binary_frame(&frame),
            Err(ProtocolError::TruncatedBinaryFrame { .. })
        ));

        let mut frame = Vec::new();
        frame.extend_from_slice(&2u32.to_le_bytes());
        frame.extend_from_slice(b"zz");
        assert!(matches!(
            parse_binary_frame(&frame),
            Err(ProtocolError::BadMetadata)
        ));
    }

    #[test]
    fn metadata_defaults_to_pipeline_rate() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&2u32.to_le_bytes());
        frame.extend_from_slice(b"{}");
        frame.extend_from_slice(&[0, 0]);
        let (meta, payload) = parse_binary_frame(&frame).unwrap();
        assert_eq!(meta.sample_rate, 16_000);
        assert_eq!(payload.len(), 2);
    }
}
