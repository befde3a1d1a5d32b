//! Server configuration, loaded once at startup from YAML.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use scriba_core::recorder::RecorderConfig;
use scriba_core::vad::VadConfig;
use scriba_core::{EngineSettings, LiveEngineSettings, ManagerConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub main_transcriber: MainTranscriberSection,
    pub live_transcriber: LiveTranscriberSection,
    pub diarization: DiarizationSection,
    pub longform_recording: LongformSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            main_transcriber: MainTranscriberSection::default(),
            live_transcriber: LiveTranscriberSection::default(),
            diarization: DiarizationSection::default(),
            longform_recording: LongformSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// JSON file of hashed client tokens; missing file means an empty store
    /// (only localhost connections can authenticate).
    pub tokens_file: String,
    /// Seconds a connection may wait before sending its auth message.
    pub auth_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8765,
            tokens_file: "tokens.json".into(),
            auth_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MainTranscriberSection {
    pub model: String,
    pub device: String,
    pub compute_type: String,
    pub beam_size: u32,
    pub batch_size: u32,
    pub silero_sensitivity: f32,
    pub webrtc_sensitivity: u8,
    pub post_speech_silence_duration: f64,
    pub pre_recording_buffer_duration: f64,
    pub min_length_of_recording: f64,
    pub min_gap_between_recordings: f64,
    pub max_continuous_silence_duration: f64,
    pub normalize_audio: bool,
    pub initial_prompt: Option<String>,
}

impl Default for MainTranscriberSection {
    fn default() -> Self {
        Self {
            model: "Systran/faster-whisper-large-v3".into(),
            device: "cuda".into(),
            compute_type: "default".into(),
            beam_size: 5,
            batch_size: 16,
            silero_sensitivity: 0.4,
            webrtc_sensitivity: 3,
            post_speech_silence_duration: 0.6,
            pre_recording_buffer_duration: 0.2,
            min_length_of_recording: 0.5,
            min_gap_between_recordings: 1.0,
            max_continuous_silence_duration: 5.0,
            normalize_audio: false,
            initial_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveTranscriberSection {
    pub enabled: bool,
    /// Live model; equal (after normalization) to the main model means the
    /// engines are shared.
    pub model: Option<String>,
    pub beam_size: u32,
    pub batch_size: u32,
    pub post_speech_silence_duration: f64,
    pub early_transcription_on_silence: f64,
    /// Minimum seconds between preview inferences per session.
    pub preview_interval_secs: f64,
}

impl Default for LiveTranscriberSection {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            beam_size: 3,
            batch_size: 8,
            post_speech_silence_duration: 0.3,
            early_transcription_on_silence: 0.5,
            preview_interval_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DiarizationSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LongformSection {
    /// Default language; empty means auto-detect.
    pub language: String,
}

impl ServerConfig {
    /// Load from a YAML file. A missing file yields the defaults; a present
    /// but malformed file is an error (silent fallback would mask typos).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(?path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.server.host.clone(), self.server.port)
    }

    /// Default language as an option (empty string means auto-detect).
    pub fn default_language(&self) -> Option<String> {
        let lang = self.longform_recording.language.trim();
        if lang.is_empty() {
            None
        } else {
            Some(lang.to_string())
        }
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        let main = &self.main_transcriber;
        RecorderConfig {
            post_speech_silence: main.post_speech_silence_duration,
            min_utterance: main.min_length_of_recording,
            min_gap: main.min_gap_between_recordings,
            pre_roll: main.pre_recording_buffer_duration,
            max_continuous_silence: main.max_continuous_silence_duration,
            ..RecorderConfig::default()
        }
    }

    pub fn vad_config(&self) -> VadConfig {
        let main = &self.main_transcriber;
        VadConfig {
            energy_sensitivity: main.webrtc_sensitivity,
            neural_sensitivity: main.silero_sensitivity,
            ..VadConfig::default()
        }
    }

    fn engine_settings(&self) -> EngineSettings {
        let main = &self.main_transcriber;
        EngineSettings {
            model: main.model.clone(),
            device: main.device.clone(),
            compute_type: main.compute_type.clone(),
            beam_size: main.beam_size,
            batch_size: main.batch_size,
            language: self.longform_recording.language.clone(),
            initial_prompt: main.initial_prompt.clone(),
            normalize_audio: main.normalize_audio,
            ..EngineSettings::default()
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let live = &self.live_transcriber;
        ManagerConfig {
            main: self.engine_settings(),
            live: LiveEngineSettings {
                enabled: live.enabled,
                model: live.model.clone(),
                beam_size: live.beam_size,
                batch_size: live.batch_size,
                post_speech_silence: live.post_speech_silence_duration,
                early_transcription_on_silence: live.early_transcription_on_silence,
            },
            diarization_model: self.diarization.model.clone(),
        }
    }
}
