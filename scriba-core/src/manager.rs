//! Process-wide model lifecycle management.
//!
//! One `ModelManager` is constructed at server bootstrap and injected into
//! the transport layer — there is no global singleton. It owns the three
//! model slots (file engine, per-session realtime engines, diarizer), the
//! [`JobTracker`] admission gate, and the share-one-engine policy that
//! halves GPU memory when the main and live models are equivalent.
//!
//! All slot mutations are serialized by one mutex. Engine construction may
//! take minutes (model download + GPU load) and deliberately happens inside
//! that lock; callers tolerate the wait, timeouts live outside.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::stub::{StubDiarizer, StubEngine};
use crate::engine::{DiarizerHandle, EngineHandle, EngineSettings};
use crate::error::{Result, ScribaError};
use crate::jobs::{JobStatus, JobTracker};

/// Model-name prefixes that do not change the underlying weights.
const VENDOR_PREFIXES: [&str; 3] = ["systran/", "faster-whisper-", "openai/whisper-"];

/// Live (preview) engine configuration. The live engine trades accuracy for
/// latency: smaller beam, shorter silence windows.
#[derive(Debug, Clone)]
pub struct LiveEngineSettings {
    pub enabled: bool,
    /// Live model; `None` means "same as main" (and therefore shared).
    pub model: Option<String>,
    pub beam_size: u32,
    pub batch_size: u32,
    pub post_speech_silence: f64,
    pub early_transcription_on_silence: f64,
}

impl Default for LiveEngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
            beam_size: 3,
            batch_size: 8,
            post_speech_silence: 0.3,
            early_transcription_on_silence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub main: EngineSettings,
    pub live: LiveEngineSettings,
    pub diarization_model: Option<String>,
}

/// Which kind of client a realtime engine serves (drives logging and the
/// warm-keeping policy; web clients never get a separate live engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeClient {
    Standalone,
    Web,
}

/// Builds concrete engine backends from settings. The default
/// [`StubFactory`] wires the deterministic stub backends; deployments with
/// real model bindings provide their own factory at bootstrap.
pub trait EngineFactory: Send + Sync + 'static {
    fn create_transcriber(&self, settings: &EngineSettings) -> Result<EngineHandle>;
    fn create_diarizer(&self, model: &str) -> Result<DiarizerHandle>;
}

/// Factory producing the stub backends.
pub struct StubFactory;

impl EngineFactory for StubFactory {
    fn create_transcriber(&self, settings: &EngineSettings) -> Result<EngineHandle> {
        Ok(EngineHandle::new(StubEngine::new(settings.model.clone())))
    }

    fn create_diarizer(&self, model: &str) -> Result<DiarizerHandle> {
        Ok(DiarizerHandle::new(StubDiarizer::new(model)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GpuStatus {
    pub available: bool,
    pub total_gb: Option<f64>,
    pub used_gb: Option<f64>,
}

fn probe_gpu(device: &str) -> GpuStatus {
    let available = device.eq_ignore_ascii_case("cuda")
        && (Path::new("/dev/nvidia0").exists() || Path::new("/proc/driver/nvidia").exists());
    GpuStatus {
        available,
        total_gb: None,
        used_gb: None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionSlotStatus {
    pub loaded: bool,
    pub model: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiarizationSlotStatus {
    pub loaded: bool,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeStatus {
    pub active_sessions: usize,
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub gpu: GpuStatus,
    pub transcription: TranscriptionSlotStatus,
    pub diarization: DiarizationSlotStatus,
    pub realtime: RealtimeStatus,
    pub standalone_clients: usize,
    pub job: JobStatus,
}

struct RealtimeSlot {
    handle: EngineHandle,
    shares_file_engine: bool,
}

#[derive(Default)]
struct Slots {
    file_engine: Option<EngineHandle>,
    diarizer: Option<DiarizerHandle>,
    realtime: HashMap<Uuid, RealtimeSlot>,
    standalone_clients: usize,
}

pub struct ModelManager {
    config: ManagerConfig,
    factory: Box<dyn EngineFactory>,
    gpu: GpuStatus,
    jobs: JobTracker,
    slots: Mutex<Slots>,
}

impl ModelManager {
    pub fn new(config: ManagerConfig, factory: Box<dyn EngineFactory>) -> Self {
        let gpu = probe_gpu(&config.main.device);
        if gpu.available {
            info!(device = config.main.device.as_str(), "GPU available");
        } else {
            warn!("no GPU available, transcription will run on CPU");
        }

        Self {
            config,
            factory,
            gpu,
            jobs: JobTracker::new(),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// The admission gate shared by every transcription entry point.
    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn main_model_name(&self) -> &str {
        &self.config.main.model
    }

    /// The live model name, defaulting to the main model.
    pub fn live_model_name(&self) -> &str {
        self.config
            .live
            .model
            .as_deref()
            .unwrap_or(&self.config.main.model)
    }

    pub fn live_enabled(&self) -> bool {
        self.config.live.enabled
    }

    /// Whether the live and main engines alias one loaded model.
    pub fn engines_shareable(&self) -> bool {
        self.config.live.enabled
            && Self::is_same_model(self.main_model_name(), self.live_model_name())
    }

    /// Two model names are "the same" iff, after lowercasing, trimming and
    /// stripping known vendor prefixes, the remaining strings are equal.
    pub fn is_same_model(a: &str, b: &str) -> bool {
        normalize_model_name(a) == normalize_model_name(b)
    }

    /// The shared file-transcription engine, created lazily on first call.
    pub fn file_engine(&self) -> Result<EngineHandle> {
        let mut slots = self.slots.lock();
        self.file_engine_locked(&mut slots)
    }

    fn file_engine_locked(&self, slots: &mut Slots) -> Result<EngineHandle> {
        if let Some(handle) = slots.file_engine.as_ref() {
            return Ok(handle.clone());
        }
        info!(
            model = self.config.main.model.as_str(),
            device = self.config.main.device.as_str(),
            "creating file transcription engine"
        );
        let handle = self.factory.create_transcriber(&self.config.main)?;
        slots.file_engine = Some(handle.clone());
        Ok(handle)
    }

    /// Explicitly load the file engine's model, reporting progress lines.
    ///
    /// A failed load leaves the slot empty so a retry is possible.
    pub fn load_transcription_model(&self, progress: &mut dyn FnMut(&str)) -> Result<()> {
        let handle = self.file_engine()?;
        let mut engine = handle.0.lock();
        if engine.is_loaded() {
            return Ok(());
        }
        progress("Loading transcription model...");
        progress(&format!("Model: {}", engine.model_name()));
        if let Err(e) = engine.load(progress) {
            drop(engine);
            self.slots.lock().file_engine = None;
            return Err(e);
        }
        progress("Transcription model ready");
        Ok(())
    }

    pub fn unload_transcription_model(&self) {
        let taken = self.slots.lock().file_engine.take();
        if let Some(handle) = taken {
            handle.0.lock().unload();
            info!("transcription model unloaded");
        }
    }

    /// Engine suitable for driving a session's recorder/preview. When the
    /// live and main models are equivalent this returns the *same*
    /// underlying engine as [`file_engine`](Self::file_engine), halving GPU
    /// memory use; otherwise a distinct live engine with lighter settings.
    pub fn get_or_create_realtime_engine(
        &self,
        session_id: Uuid,
        client: RealtimeClient,
        language: Option<&str>,
    ) -> Result<EngineHandle> {
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.realtime.get(&session_id) {
            return Ok(slot.handle.clone());
        }

        let (handle, shared) = if self.engines_shareable() {
            (self.file_engine_locked(&mut slots)?, true)
        } else {
            let settings = self.live_engine_settings(language);
            info!(
                %session_id,
                model = settings.model.as_str(),
                "creating dedicated live engine"
            );
            (self.factory.create_transcriber(&settings)?, false)
        };

        info!(%session_id, ?client, shared, "realtime engine ready");
        slots.realtime.insert(
            session_id,
            RealtimeSlot {
                handle: handle.clone(),
                shares_file_engine: shared,
            },
        );
        Ok(handle)
    }

    fn live_engine_settings(&self, language: Option<&str>) -> EngineSettings {
        EngineSettings {
            model: self.live_model_name().to_string(),
            beam_size: self.config.live.beam_size,
            batch_size: self.config.live.batch_size,
            language: language
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| self.config.main.language.clone()),
            ..self.config.main.clone()
        }
    }

    /// Drop a session's realtime slot. Only shuts the engine down when it
    /// was not aliased to the file engine. Idempotent.
    pub fn release_realtime_engine(&self, session_id: Uuid) {
        let removed = self.slots.lock().realtime.remove(&session_id);
        if let Some(slot) = removed {
            if !slot.shares_file_engine {
                slot.handle.0.lock().unload();
            }
            info!(%session_id, "released realtime engine");
        }
    }

    /// The diarization engine, created lazily on first call.
    pub fn diarizer(&self) -> Result<DiarizerHandle> {
        let model = self
            .config
            .diarization_model
            .as_deref()
            .ok_or_else(|| ScribaError::Engine("diarization model not configured".into()))?;

        let mut slots = self.slots.lock();
        if let Some(handle) = slots.diarizer.as_ref() {
            return Ok(handle.clone());
        }
        info!(model, "creating diarization engine");
        let handle = self.factory.create_diarizer(model)?;
        slots.diarizer = Some(handle.clone());
        Ok(handle)
    }

    pub fn load_diarization_model(&self) -> Result<()> {
        let handle = self.diarizer()?;
        let mut engine = handle.0.lock();
        if engine.is_loaded() {
            return Ok(());
        }
        info!("loading diarization model");
        if let Err(e) = engine.load() {
            drop(engine);
            self.slots.lock().diarizer = None;
            return Err(e);
        }
        info!("diarization model ready");
        Ok(())
    }

    pub fn unload_diarization(&self) {
        let taken = self.slots.lock().diarizer.take();
        if let Some(handle) = taken {
            handle.0.lock().unload();
            info!("diarization model unloaded");
        }
    }

    /// Release everything, in a fixed order: realtime engines, then the
    /// diarizer, then the file engine. Invoked on shutdown.
    pub fn unload_all(&self) {
        info!("unloading all models");
        let session_ids: Vec<Uuid> = self.slots.lock().realtime.keys().copied().collect();
        for id in session_ids {
            self.release_realtime_engine(id);
        }
        self.unload_diarization();
        self.unload_transcription_model();
        info!("all models unloaded");
    }

    /// A standalone client connected; keeps the shared engine warm.
    pub fn on_standalone_client_connected(&self) {
        let mut slots = self.slots.lock();
        slots.standalone_clients += 1;
        info!(
            standalone_clients = slots.standalone_clients,
            "standalone client connected"
        );
    }

    pub fn on_standalone_client_disconnected(&self) {
        let mut slots = self.slots.lock();
        slots.standalone_clients = slots.standalone_clients.saturating_sub(1);
        info!(
            standalone_clients = slots.standalone_clients,
            "standalone client disconnected"
        );
    }

    /// Consistent snapshot of every slot plus the job tracker.
    pub fn status(&self) -> ModelStatus {
        let slots = self.slots.lock();

        // A held engine lock means a transcription is in flight — the model
        // is necessarily loaded; don't block the status path on it.
        let transcription_loaded = slots
            .file_engine
            .as_ref()
            .map(|h| h.0.try_lock().map(|e| e.is_loaded()).unwrap_or(true))
            .unwrap_or(false);
        let diarization_loaded = slots
            .diarizer
            .as_ref()
            .map(|h| h.0.try_lock().map(|e| e.is_loaded()).unwrap_or(true))
            .unwrap_or(false);

        ModelStatus {
            gpu: self.gpu.clone(),
            transcription: TranscriptionSlotStatus {
                loaded: transcription_loaded,
                model: self.config.main.model.clone(),
                device: self.config.main.device.clone(),
            },
            diarization: DiarizationSlotStatus {
                loaded: diarization_loaded,
                model: self.config.diarization_model.clone(),
            },
            realtime: RealtimeStatus {
                active_sessions: slots.realtime.len(),
                session_ids: slots.realtime.keys().map(Uuid::to_string).collect(),
            },
            standalone_clients: slots.standalone_clients,
            job: self.jobs.status(),
        }
    }
}

fn normalize_model_name(name: &str) -> String {
    let mut normalized = name.trim().to_ascii_lowercase();
    for prefix in VENDOR_PREFIXES {
        if let Some(stripped) = normalized.strip_prefix(prefix) {
            normalized = stripped.to_string();
        }
    }
    normalized
}
