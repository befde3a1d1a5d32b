//! Voice activity detection.
//!
//! Two-stage design: a cheap frame-energy detector runs on every frame and
//! dominates during silence; a neural classifier (Silero, behind the `onnx`
//! feature) confirms borderline frames before speech is declared. Once
//! speech has been confirmed the deactivation check is deliberately more
//! permissive so utterances are not chopped mid-word.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod silero;

#[cfg(feature = "onnx")]
pub use silero::SileroVad;

use energy::EnergyDetector;

/// Frame-level speech classifier. Implementors may be stateful (hangover
/// counters, RNN hidden states); `reset` must return them to their freshly
/// constructed behavior.
pub trait FrameClassifier: Send + 'static {
    fn is_speech(&mut self, frame: &[i16]) -> bool;
    fn reset(&mut self);
}

/// The interface the recorder drives. Split from [`FrameClassifier`] because
/// activation and deactivation use different detector combinations.
pub trait VoiceGate: Send + 'static {
    /// Speech onset check — used to start a recording.
    fn is_voice(&mut self, frame: &[i16]) -> bool;

    /// Speech continuation check — used while recording to decide when the
    /// utterance has ended.
    fn is_still_voice(&mut self, frame: &[i16]) -> bool;

    /// Zero all hysteresis and hidden state.
    fn reset(&mut self);
}

/// Tunables for [`DualVad`].
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Energy detector aggressiveness in 0..=3. Higher filters more.
    pub energy_sensitivity: u8,
    /// Neural speech-probability threshold in [0.0, 1.0].
    pub neural_sensitivity: f32,
    /// Consult the neural detector for deactivation too. Default: off —
    /// once speech is confirmed, the cheap detector alone keeps it open.
    pub neural_deactivation: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_sensitivity: 3,
            neural_sensitivity: 0.4,
            neural_deactivation: false,
        }
    }
}

/// Two-stage voice activity detector.
///
/// `is_voice` is true iff both stages agree the frame contains speech. The
/// energy stage is evaluated first so silent frames never pay the neural
/// inference cost.
pub struct DualVad {
    energy: EnergyDetector,
    neural: Option<Box<dyn FrameClassifier>>,
    neural_deactivation: bool,
}

impl DualVad {
    /// Energy-only detector (no neural stage).
    pub fn new(config: &VadConfig) -> Self {
        Self {
            energy: EnergyDetector::from_sensitivity(config.energy_sensitivity),
            neural: None,
            neural_deactivation: config.neural_deactivation,
        }
    }

    /// Detector with a confirmatory neural stage.
    pub fn with_neural(config: &VadConfig, neural: Box<dyn FrameClassifier>) -> Self {
        Self {
            energy: EnergyDetector::from_sensitivity(config.energy_sensitivity),
            neural: Some(neural),
            neural_deactivation: config.neural_deactivation,
        }
    }
}

impl VoiceGate for DualVad {
    fn is_voice(&mut self, frame: &[i16]) -> bool {
        if !self.energy.is_speech(frame) {
            return false;
        }
        match self.neural.as_mut() {
            Some(neural) => neural.is_speech(frame),
            None => true,
        }
    }

    fn is_still_voice(&mut self, frame: &[i16]) -> bool {
        let energetic = self.energy.is_speech(frame);
        if !self.neural_deactivation {
            return energetic;
        }
        energetic
            && self
                .neural
                .as_mut()
                .map(|n| n.is_speech(frame))
                .unwrap_or(true)
    }

    fn reset(&mut self) {
        self.energy.reset();
        if let Some(neural) = self.neural.as_mut() {
            neural.reset();
        }
    }
}
