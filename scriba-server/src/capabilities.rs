//! Client classification and the capability record echoed back in `auth_ok`.
//!
//! The `X-Client-Type` header is authoritative when present; a `client_type`
//! query parameter is the fallback. Anything unknown is a web client, which
//! gets the conservative capability set (explicit start/stop, no VAD events).

use std::collections::HashMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

pub const CLIENT_TYPE_HEADER: &str = "x-client-type";
pub const CLIENT_TYPE_QUERY: &str = "client_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Interactive desktop app: VAD events and live preview.
    Standalone,
    /// Browser client: explicit start/stop, no VAD-driven events.
    Web,
}

impl ClientType {
    pub fn detect(headers: &HeaderMap, query: &HashMap<String, String>) -> Self {
        let from_header = headers
            .get(CLIENT_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);
        let from_query = query.get(CLIENT_TYPE_QUERY).map(|v| v.to_ascii_lowercase());

        match from_header.or(from_query).as_deref() {
            Some("standalone") => Self::Standalone,
            _ => Self::Web,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Web => "web",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiarizationCapability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Feature flags derived from the client type, echoed to the client so it
/// never has to guess server behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capabilities {
    pub client_type: ClientType,
    pub supports_vad_events: bool,
    pub supports_preview: bool,
    pub diarization: DiarizationCapability,
}

impl Capabilities {
    pub fn for_client(client_type: ClientType, diarization_available: bool) -> Self {
        let interactive = client_type == ClientType::Standalone;
        Self {
            client_type,
            supports_vad_events: interactive,
            supports_preview: interactive,
            diarization: if diarization_available {
                DiarizationCapability {
                    available: true,
                    reason: None,
                }
            } else {
                DiarizationCapability {
                    available: false,
                    reason: Some("token_missing".into()),
                }
            },
        }
    }
}
