//! Per-session audio recorder.
//!
//! Converts a stream of PCM chunks plus three control commands (`listen`,
//! `start`, `stop`) into zero or more completed [`Utterance`]s, emitting
//! lifecycle events through [`RecorderEvents`] along the way.
//!
//! ## State machine
//!
//! ```text
//! Inactive ──listen()──► Listening
//! Listening ──VAD voice──► Recording      (pre-roll prepended)
//! Recording ──silence ≥ post-speech──► Inactive   (auto-stop armed)
//! Recording ──silence ≥ max continuous──► Trimming
//! Trimming ──VAD voice──► Recording       (trimmed frames never kept)
//! Trimming ──stop()──► Inactive
//! any ──shutdown()──► terminal
//! ```
//!
//! ## Threading
//!
//! `feed_audio` never blocks: it converts, resamples and pushes into a
//! lock-free SPSC ring. The worker thread owns the VAD and the state
//! machine. Completed utterances arrive on a crossbeam channel consumed by
//! [`wait_utterance`](Recorder::wait_utterance).

pub mod events;
mod worker;

pub use events::{NullEvents, RecorderEvents};

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split};
use ringbuf::HeapRb;
use tracing::{debug, error, info, warn};

use crate::audio::resample::Resampler;
use crate::audio::{pcm_bytes_to_samples, samples_to_f32, SAMPLE_RATE};
use crate::vad::VoiceGate;

use self::worker::Worker;

/// The fixed rate the recorder operates at (Hz).
pub(crate) const WORKING_RATE: u32 = SAMPLE_RATE;

type AudioProducer = ringbuf::HeapProd<i16>;
type AudioConsumer = ringbuf::HeapCons<i16>;

/// Recorder timing and sizing parameters. All durations are in seconds and
/// are internally converted to sample counts — the recorder never consults
/// a wall clock.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Samples per VAD frame. Default: 512 (32 ms at 16 kHz).
    pub frame_size: usize,
    /// Silence that ends an utterance when auto-stop is armed. Default: 0.6.
    pub post_speech_silence: f64,
    /// Minimum utterance length worth transcribing. Default: 0.5.
    pub min_utterance: f64,
    /// Minimum gap between two recordings; a `start` inside the gap is a
    /// logged no-op. Default: 1.0.
    pub min_gap: f64,
    /// Audio retained before the VAD fires, prepended to the utterance.
    /// Default: 0.2.
    pub pre_roll: f64,
    /// Continuous silence after which frames are trimmed instead of
    /// appended. Default: 5.0.
    pub max_continuous_silence: f64,
    /// Ring capacity in samples. When the feed outpaces the worker, the
    /// oldest buffered audio is discarded with a warning rather than
    /// blocking the caller.
    pub ring_capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frame_size: 512,
            post_speech_silence: 0.6,
            min_utterance: 0.5,
            min_gap: 1.0,
            pre_roll: 0.2,
            max_continuous_silence: 5.0,
            // ≈ 30 s of backlog at 16 kHz
            ring_capacity: SAMPLE_RATE as usize * 30,
        }
    }
}

/// Recorder lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Inactive,
    Listening,
    Recording,
    Trimming,
    Transcribing,
}

/// A completed utterance: contiguous 16 kHz mono int16 audio bounded by
/// pre-roll and post-speech silence.
#[derive(Debug, Clone)]
pub struct Utterance {
    samples: Vec<i16>,
}

impl Utterance {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(WORKING_RATE)
    }

    pub fn to_f32(&self) -> Vec<f32> {
        samples_to_f32(&self.samples)
    }
}

pub(crate) enum Command {
    Listen,
    Start,
    Stop,
}

pub(crate) struct Shared {
    pub(crate) config: RecorderConfig,
    pub(crate) state: Mutex<RecorderState>,
    pub(crate) running: AtomicBool,
    /// Mirror of the in-progress utterance, for best-effort live preview.
    pub(crate) current_audio: Mutex<Vec<i16>>,
}

struct FeedState {
    /// Carries a trailing odd byte between chunks.
    remainder: Vec<u8>,
    /// Lazily created; rebuilt when the declared source rate changes.
    resampler: Option<Resampler>,
}

/// Handle to a running per-session recorder.
pub struct Recorder {
    shared: Arc<Shared>,
    producer: Mutex<AudioProducer>,
    /// Shared with the worker so the feed path can evict the oldest
    /// buffered audio on overflow.
    consumer: Arc<Mutex<AudioConsumer>>,
    ring_capacity: usize,
    feed: Mutex<FeedState>,
    command_tx: Sender<Command>,
    utterance_rx: Receiver<Utterance>,
    shutdown_started: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Recorder {
    /// Spawn a recorder with the given VAD and event sink.
    pub fn new(
        config: RecorderConfig,
        vad: Box<dyn VoiceGate>,
        events: Arc<dyn RecorderEvents>,
    ) -> Self {
        let ring_capacity = config.ring_capacity.max(config.frame_size);
        let (producer, consumer) = HeapRb::<i16>::new(ring_capacity).split();
        let consumer = Arc::new(Mutex::new(consumer));
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (utterance_tx, utterance_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(RecorderState::Inactive),
            running: AtomicBool::new(true),
            current_audio: Mutex::new(Vec::new()),
        });

        let worker = Worker::new(
            Arc::clone(&shared),
            Arc::clone(&consumer),
            command_rx,
            vad,
            events,
            utterance_tx,
        );

        let handle = std::thread::Builder::new()
            .name("scriba-recorder".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| worker.run()));
                if result.is_err() {
                    error!("recorder worker panicked — session recording is dead");
                }
            })
            .expect("spawn recorder worker thread");

        Self {
            shared,
            producer: Mutex::new(producer),
            consumer,
            ring_capacity,
            feed: Mutex::new(FeedState {
                remainder: Vec::new(),
                resampler: None,
            }),
            command_tx,
            utterance_rx,
            shutdown_started: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Feed a chunk of little-endian int16 PCM. Accepted in every state;
    /// never blocks and never fails — malformed or empty chunks are dropped
    /// with a debug log. When the backlog exceeds the ring capacity the
    /// oldest buffered audio is evicted with a warning so live input keeps
    /// flowing.
    pub fn feed_audio(&self, chunk: &[u8], source_rate: u32) {
        if chunk.is_empty() {
            debug!("empty audio chunk dropped");
            return;
        }

        let samples = {
            let mut feed = self.feed.lock();

            let mut bytes = std::mem::take(&mut feed.remainder);
            bytes.extend_from_slice(chunk);
            if bytes.len() % 2 != 0 {
                let tail = bytes.split_off(bytes.len() - 1);
                feed.remainder = tail;
            }
            let samples = pcm_bytes_to_samples(&bytes);
            if samples.is_empty() {
                return;
            }

            if source_rate == WORKING_RATE {
                samples
            } else {
                let needs_rebuild = feed
                    .resampler
                    .as_ref()
                    .map(|r| r.source_rate() != source_rate)
                    .unwrap_or(true);
                if needs_rebuild {
                    match Resampler::new(source_rate, WORKING_RATE) {
                        Ok(r) => feed.resampler = Some(r),
                        Err(e) => {
                            warn!(source_rate, "cannot resample chunk, dropping: {e}");
                            return;
                        }
                    }
                }
                feed.resampler
                    .as_mut()
                    .map(|r| r.convert(&samples))
                    .unwrap_or_default()
            }
        };

        if samples.is_empty() {
            return;
        }

        let mut producer = self.producer.lock();
        let mut dropped = 0usize;

        // A chunk larger than the whole ring keeps only its newest tail.
        let samples: &[i16] = if samples.len() > self.ring_capacity {
            dropped += samples.len() - self.ring_capacity;
            &samples[samples.len() - self.ring_capacity..]
        } else {
            &samples
        };

        // Evict the oldest buffered audio to make room for the new chunk.
        let vacant = producer.vacant_len();
        if vacant < samples.len() {
            dropped += self.consumer.lock().skip(samples.len() - vacant);
        }
        if dropped > 0 {
            warn!(
                dropped,
                "recorder backlog full — worker cannot keep up, oldest audio dropped"
            );
        }

        let pushed = producer.push_slice(samples);
        if pushed < samples.len() {
            warn!(
                dropped = samples.len() - pushed,
                "recorder ring rejected audio"
            );
        }
    }

    /// Arm VAD-driven auto start/stop: `Inactive → Listening`.
    pub fn listen(&self) {
        self.send_command(Command::Listen);
    }

    /// Force recording to begin now; runs until an explicit [`stop`](Self::stop).
    /// A start inside the minimum inter-recording gap is a logged no-op.
    pub fn start(&self) {
        self.send_command(Command::Start);
    }

    /// Finalize the current recording (or cancel listening) and deliver the
    /// utterance to the channel.
    pub fn stop(&self) {
        self.send_command(Command::Stop);
    }

    fn send_command(&self, command: Command) {
        if self.command_tx.send(command).is_err() {
            debug!("recorder command dropped: worker has exited");
        }
    }

    /// Block until the next completed utterance (or shutdown → `None`).
    pub fn wait_utterance(&self) -> Option<Utterance> {
        self.utterance_rx.recv().ok()
    }

    /// Like [`wait_utterance`](Self::wait_utterance) with an upper bound.
    pub fn wait_utterance_timeout(&self, timeout: Duration) -> Option<Utterance> {
        self.utterance_rx.recv_timeout(timeout).ok()
    }

    /// Current state snapshot.
    pub fn state(&self) -> RecorderState {
        *self.shared.state.lock()
    }

    pub fn is_recording(&self) -> bool {
        matches!(
            self.state(),
            RecorderState::Recording | RecorderState::Trimming
        )
    }

    /// Copy of the in-progress utterance audio, for best-effort preview.
    pub fn current_audio(&self) -> Vec<i16> {
        self.shared.current_audio.lock().clone()
    }

    /// Mark the recorder as busy transcribing its last utterance.
    pub fn mark_transcribing(&self) {
        let mut state = self.shared.state.lock();
        if *state == RecorderState::Inactive {
            *state = RecorderState::Transcribing;
        }
    }

    /// Return to `Inactive` after transcription completes.
    pub fn mark_inactive(&self) {
        let mut state = self.shared.state.lock();
        if *state == RecorderState::Transcribing {
            *state = RecorderState::Inactive;
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested. A closed
    /// utterance channel without this flag means the worker died.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Stop the worker and unblock any waiter. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("recorder shutdown requested");
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("recorder worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}
