//! Recorder lifecycle event sink.
//!
//! The session owning a recorder implements this trait instead of wiring a
//! forest of per-event closures. All methods default to no-ops; they are
//! invoked from the recorder's worker thread and must not block for long —
//! a stalled sink stalls frame processing.

/// Capability interface for recorder lifecycle notifications.
pub trait RecorderEvents: Send + Sync + 'static {
    /// Voice activity first detected while listening.
    fn on_vad_start(&self) {}

    /// Voice activity ended (post-speech silence elapsed).
    fn on_vad_stop(&self) {}

    /// A recording began (voice-triggered or forced).
    fn on_recording_start(&self) {}

    /// A recording finished; the utterance is on its way to the channel.
    fn on_recording_stop(&self) {}
}

/// Sink that ignores every event.
pub struct NullEvents;

impl RecorderEvents for NullEvents {}
