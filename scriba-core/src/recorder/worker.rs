//! Recorder worker loop — the voice-activity-driven state machine.
//!
//! ## Per-iteration stages
//!
//! ```text
//! 1. Drain pending control commands (Listen / Start / Stop)
//! 2. Pop one frame (FrameSize samples) from the SPSC ring
//! 3. Run the VAD on the frame
//! 4. Advance the state machine; append to / trim the utterance buffer
//! 5. On utterance end: push the buffer into the utterance channel
//! ```
//!
//! All durations are sample-timed: pre-roll, post-speech silence, minimum
//! length and the inter-recording gap are measured by summing frame
//! durations, never by wall-clock reads. Identical input produces identical
//! transitions regardless of host load.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use ringbuf::traits::Consumer as _;
use tracing::{debug, info, warn};

use crate::vad::VoiceGate;

use super::{AudioConsumer, Command, RecorderEvents, RecorderState, Shared, Utterance};

/// Sleep when the ring has no complete frame (avoids busy-wait).
const SLEEP_EMPTY: Duration = Duration::from_millis(2);

pub(super) struct Worker {
    shared: Arc<Shared>,
    /// Shared with the feed path, which evicts the oldest samples here
    /// when the backlog overflows.
    consumer: Arc<Mutex<AudioConsumer>>,
    commands: Receiver<Command>,
    vad: Box<dyn VoiceGate>,
    events: Arc<dyn RecorderEvents>,
    utterance_tx: Sender<Utterance>,

    // Thresholds converted to sample counts once, up front.
    frame_size: usize,
    post_speech_samples: u64,
    min_utterance_samples: u64,
    min_gap_samples: u64,
    max_silence_samples: u64,
    pre_roll_frames: usize,

    // Monotonic sample clock: total samples processed since spawn.
    clock: u64,
    /// Clock value at the end of the previous recording.
    stop_clock: Option<u64>,

    pre_roll: VecDeque<Vec<i16>>,
    utterance: Vec<i16>,
    /// Consecutive silence observed while recording (samples).
    silence_run: u64,
    /// Silence samples currently sitting at the tail of `utterance`.
    trailing_silence: u64,

    /// Arm VAD-driven auto-start (set by `Listen`).
    start_on_voice: bool,
    /// Stop automatically once post-speech silence elapses.
    auto_stop: bool,
}

impl Worker {
    pub(super) fn new(
        shared: Arc<Shared>,
        consumer: Arc<Mutex<AudioConsumer>>,
        commands: Receiver<Command>,
        vad: Box<dyn VoiceGate>,
        events: Arc<dyn RecorderEvents>,
        utterance_tx: Sender<Utterance>,
    ) -> Self {
        let cfg = &shared.config;
        let rate = f64::from(super::WORKING_RATE);
        let to_samples = |secs: f64| (secs * rate).round() as u64;

        let frame_size = cfg.frame_size;
        let post_speech_samples = to_samples(cfg.post_speech_silence).max(1);
        let min_utterance_samples = to_samples(cfg.min_utterance);
        let min_gap_samples = to_samples(cfg.min_gap);
        let max_silence_samples = to_samples(cfg.max_continuous_silence).max(post_speech_samples);
        let pre_roll_frames =
            ((to_samples(cfg.pre_roll) as usize).div_ceil(frame_size.max(1))).max(1);

        Self {
            shared,
            consumer,
            commands,
            vad,
            events,
            utterance_tx,
            frame_size,
            post_speech_samples,
            min_utterance_samples,
            min_gap_samples,
            max_silence_samples,
            pre_roll_frames,
            clock: 0,
            stop_clock: None,
            pre_roll: VecDeque::new(),
            utterance: Vec::new(),
            silence_run: 0,
            trailing_silence: 0,
            start_on_voice: false,
            auto_stop: false,
        }
    }

    pub(super) fn run(mut self) {
        info!("recorder worker started");

        let mut frame = vec![0i16; self.frame_size];
        let mut filled = 0usize;

        loop {
            if !self.shared.running.load(Ordering::SeqCst) {
                break;
            }

            while let Ok(command) = self.commands.try_recv() {
                self.handle_command(command);
            }

            let n = self.consumer.lock().pop_slice(&mut frame[filled..]);
            filled += n;
            if filled < self.frame_size {
                std::thread::sleep(SLEEP_EMPTY);
                continue;
            }
            filled = 0;

            self.process_frame(&frame);
        }

        // Flush on shutdown so mid-recording audio is not silently lost.
        if self.is_recording() && !self.utterance.is_empty() {
            info!(
                buffered_samples = self.utterance.len(),
                "shutdown with buffered recording — flushing utterance"
            );
            self.events.on_recording_stop();
            self.finalize_utterance();
        }

        info!("recorder worker stopped");
        // `utterance_tx` drops here, unblocking any waiter.
    }

    fn is_recording(&self) -> bool {
        matches!(
            self.state(),
            RecorderState::Recording | RecorderState::Trimming
        )
    }

    fn state(&self) -> RecorderState {
        *self.shared.state.lock()
    }

    fn set_state(&self, new_state: RecorderState) {
        let mut state = self.shared.state.lock();
        if *state != new_state {
            debug!(from = ?*state, to = ?new_state, "recorder state");
            *state = new_state;
        }
    }

    fn within_min_gap(&self) -> bool {
        match self.stop_clock {
            Some(stopped_at) => self.clock.saturating_sub(stopped_at) < self.min_gap_samples,
            None => false,
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Listen => match self.state() {
                RecorderState::Inactive | RecorderState::Transcribing => {
                    self.set_state(RecorderState::Listening);
                    self.start_on_voice = true;
                    self.auto_stop = true;
                    self.pre_roll.clear();
                    self.vad.reset();
                }
                other => debug!(state = ?other, "listen ignored"),
            },
            Command::Start => {
                if self.is_recording() {
                    debug!("start ignored: already recording");
                    return;
                }
                if self.within_min_gap() {
                    info!("start ignored: within minimum gap after previous recording");
                    return;
                }
                // Forced start records until an explicit Stop; post-speech
                // silence does not end it, extended silence is trimmed.
                self.auto_stop = false;
                self.start_on_voice = false;
                self.begin_recording(false);
            }
            Command::Stop => match self.state() {
                RecorderState::Recording | RecorderState::Trimming => {
                    if (self.utterance.len() as u64) < self.min_utterance_samples {
                        debug!(
                            samples = self.utterance.len(),
                            "stop before minimum utterance length — buffer will be discarded"
                        );
                    }
                    self.events.on_recording_stop();
                    self.finalize_utterance();
                }
                RecorderState::Listening => {
                    // Nothing was captured; deliver an empty buffer so the
                    // waiter unblocks and can answer with an empty result.
                    self.set_state(RecorderState::Inactive);
                    self.start_on_voice = false;
                    self.auto_stop = false;
                    self.pre_roll.clear();
                    let _ = self.utterance_tx.send(Utterance::new(Vec::new()));
                }
                other => debug!(state = ?other, "stop ignored"),
            },
        }
    }

    fn process_frame(&mut self, frame: &[i16]) {
        self.clock += frame.len() as u64;

        match self.state() {
            RecorderState::Inactive | RecorderState::Transcribing => {}

            RecorderState::Listening => {
                if self.start_on_voice && !self.within_min_gap() && self.vad.is_voice(frame) {
                    self.events.on_vad_start();
                    self.start_on_voice = false;
                    self.begin_recording(true);
                    self.append(frame);
                } else {
                    self.push_pre_roll(frame);
                }
            }

            RecorderState::Recording | RecorderState::Trimming => {
                let speech = self.vad.is_still_voice(frame);

                if speech {
                    if self.state() == RecorderState::Trimming {
                        info!("speech resumed — leaving silence trim");
                        self.set_state(RecorderState::Recording);
                    }
                    self.silence_run = 0;
                    self.trailing_silence = 0;
                    self.append(frame);
                    return;
                }

                self.silence_run += frame.len() as u64;

                if self.state() == RecorderState::Recording {
                    self.append(frame);
                    self.trailing_silence += frame.len() as u64;

                    if self.auto_stop
                        && self.silence_run >= self.post_speech_samples
                        && self.utterance.len() as u64 >= self.min_utterance_samples
                    {
                        self.events.on_vad_stop();
                        self.events.on_recording_stop();
                        self.finalize_utterance();
                        return;
                    }

                    if self.silence_run >= self.max_silence_samples {
                        self.enter_trimming();
                    }
                } else if self.auto_stop
                    && self.silence_run >= self.post_speech_samples
                    && self.utterance.len() as u64 >= self.min_utterance_samples
                {
                    // Trimming with auto-stop armed: the silence budget is
                    // long exceeded, end the utterance.
                    self.events.on_vad_stop();
                    self.events.on_recording_stop();
                    self.finalize_utterance();
                }
                // Trimming frames are otherwise dropped: fed to the VAD so
                // the transition back to Recording stays crisp, never kept.
            }
        }
    }

    fn begin_recording(&mut self, voice_triggered: bool) {
        self.utterance.clear();
        if voice_triggered {
            // Prepend buffered pre-roll so the first phoneme is not clipped.
            for buffered in self.pre_roll.drain(..) {
                self.utterance.extend_from_slice(&buffered);
            }
        } else {
            self.pre_roll.clear();
        }

        self.silence_run = 0;
        self.trailing_silence = 0;
        self.vad.reset();
        self.set_state(RecorderState::Recording);
        *self.shared.current_audio.lock() = self.utterance.clone();

        info!(
            voice_triggered,
            pre_roll_samples = self.utterance.len(),
            "recording started"
        );
        self.events.on_recording_start();
    }

    fn enter_trimming(&mut self) {
        // Keep at most one post-speech-silence worth of trailing silence in
        // the buffer; long silence runs hallucinate text out of the model.
        let excess = self
            .trailing_silence
            .saturating_sub(self.post_speech_samples) as usize;
        if excess > 0 && excess <= self.utterance.len() {
            self.utterance.truncate(self.utterance.len() - excess);
            self.trailing_silence = self.post_speech_samples;
            let mut mirror = self.shared.current_audio.lock();
            mirror.truncate(self.utterance.len());
        }
        info!(
            silence_secs = self.silence_run as f64 / f64::from(super::WORKING_RATE),
            "extended silence — trimming frames until speech resumes"
        );
        self.set_state(RecorderState::Trimming);
    }

    fn finalize_utterance(&mut self) {
        self.set_state(RecorderState::Inactive);
        self.start_on_voice = false;
        self.auto_stop = false;
        self.silence_run = 0;
        self.trailing_silence = 0;
        self.stop_clock = Some(self.clock);
        self.vad.reset();
        self.shared.current_audio.lock().clear();

        let utterance = Utterance::new(std::mem::take(&mut self.utterance));
        info!(
            samples = utterance.len(),
            duration_secs = utterance.duration_secs(),
            "utterance finalized"
        );
        if self.utterance_tx.send(utterance).is_err() {
            warn!("utterance dropped: recorder handle is gone");
        }
    }

    fn push_pre_roll(&mut self, frame: &[i16]) {
        self.pre_roll.push_back(frame.to_vec());
        while self.pre_roll.len() > self.pre_roll_frames {
            self.pre_roll.pop_front();
        }
    }

    fn append(&mut self, frame: &[i16]) {
        self.utterance.extend_from_slice(frame);
        self.shared.current_audio.lock().extend_from_slice(frame);
    }
}
