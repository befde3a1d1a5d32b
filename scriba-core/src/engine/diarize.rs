//! Speaker diarization engine contract.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::jobs::CancelToken;

use super::types::SpeakerSegment;

/// Contract for diarization backends.
///
/// Consumed opaquely: given mono f32 audio at 16 kHz, return
/// speaker-attributed spans. Backends poll `cancel` between processing
/// windows, like speech engines.
pub trait DiarizationEngine: Send + 'static {
    fn model_name(&self) -> &str;

    fn is_loaded(&self) -> bool;

    fn load(&mut self) -> Result<()>;

    fn unload(&mut self);

    fn diarize(&mut self, audio: &[f32], cancel: &CancelToken) -> Result<Vec<SpeakerSegment>>;
}

/// Thread-safe handle to a diarization backend.
#[derive(Clone)]
pub struct DiarizerHandle(pub Arc<Mutex<dyn DiarizationEngine>>);

impl DiarizerHandle {
    pub fn new<E: DiarizationEngine>(engine: E) -> Self {
        Self(Arc::new(Mutex::new(engine)))
    }
}

impl std::fmt::Debug for DiarizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiarizerHandle").finish_non_exhaustive()
    }
}
