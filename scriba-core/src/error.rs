use thiserror::Error;

/// All errors produced by scriba-core.
#[derive(Debug, Error)]
pub enum ScribaError {
    #[error("audio format error: {0}")]
    AudioFormat(String),

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error("engine model is not loaded")]
    EngineNotLoaded,

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("transcription cancelled")]
    Cancelled,

    #[error("recorder has shut down")]
    RecorderShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ScribaError>;
