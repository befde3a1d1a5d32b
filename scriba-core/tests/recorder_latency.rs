use std::sync::Arc;
use std::time::{Duration, Instant};

use scriba_core::audio::samples_to_pcm_bytes;
use scriba_core::recorder::{NullEvents, Recorder, RecorderConfig};
use scriba_core::vad::VoiceGate;

struct AlwaysVoice;

impl VoiceGate for AlwaysVoice {
    fn is_voice(&mut self, _frame: &[i16]) -> bool {
        true
    }

    fn is_still_voice(&mut self, _frame: &[i16]) -> bool {
        true
    }

    fn reset(&mut self) {}
}

#[test]
fn forced_stop_delivers_the_utterance_quickly() {
    let config = RecorderConfig {
        post_speech_silence: 0.064,
        min_utterance: 0.032,
        min_gap: 0.0,
        pre_roll: 0.064,
        ..Default::default()
    };
    let recorder = Recorder::new(config, Box::new(AlwaysVoice), Arc::new(NullEvents));

    recorder.start();
    recorder.feed_audio(&samples_to_pcm_bytes(&vec![5_000i16; 512 * 4]), 16_000);
    let started = Instant::now();
    std::thread::sleep(Duration::from_millis(50));
    recorder.stop();

    let utterance = recorder
        .wait_utterance_timeout(Duration::from_secs(2))
        .expect("utterance after stop");
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "stop-to-utterance took {:?}",
        started.elapsed()
    );
    assert_eq!(utterance.len(), 512 * 4);

    recorder.shutdown();
}

#[test]
fn vad_driven_flow_over_the_public_api() {
    struct GateAfterSilence {
        frames_seen: usize,
    }

    impl VoiceGate for GateAfterSilence {
        fn is_voice(&mut self, _frame: &[i16]) -> bool {
            self.frames_seen += 1;
            true
        }

        // Speech for five frames, then silence forever.
        fn is_still_voice(&mut self, _frame: &[i16]) -> bool {
            self.frames_seen += 1;
            self.frames_seen <= 5
        }

        fn reset(&mut self) {}
    }

    let config = RecorderConfig {
        post_speech_silence: 0.064, // 2 frames
        min_utterance: 0.032,
        min_gap: 0.0,
        pre_roll: 0.064,
        ..Default::default()
    };
    let recorder = Recorder::new(
        config,
        Box::new(GateAfterSilence { frames_seen: 0 }),
        Arc::new(NullEvents),
    );

    recorder.listen();
    recorder.feed_audio(&samples_to_pcm_bytes(&vec![4_000i16; 512 * 10]), 16_000);

    let utterance = recorder
        .wait_utterance_timeout(Duration::from_secs(2))
        .expect("vad-terminated utterance");
    // Frame 1 starts the recording; frames 2-5 are speech; two silence
    // frames close it out.
    assert_eq!(utterance.len(), 512 * 7);

    recorder.shutdown();
}
