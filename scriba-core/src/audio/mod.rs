//! PCM conversion helpers shared by the recorder and the upload path.
//!
//! The whole pipeline runs on signed 16-bit little-endian mono PCM at
//! 16 kHz. Everything that arrives at another rate or width is converted
//! here before it reaches the recorder or an engine.

pub mod resample;
pub mod wav;

/// The fixed working sample rate of the pipeline (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode little-endian int16 PCM bytes into samples.
///
/// A trailing odd byte (half a sample) is ignored; callers that stream
/// partial chunks should carry the remainder themselves.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode int16 samples as little-endian PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Convert int16 samples to f32 in [-1.0, 1.0].
pub fn samples_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32_768.0).collect()
}

/// Convert f32 samples in [-1.0, 1.0] to int16, clamping out-of-range input.
pub fn f32_to_samples(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16)
        .collect()
}

/// Peak-normalize in place so the loudest sample sits at `target`.
///
/// Silence is left untouched.
pub fn normalize_peak(samples: &mut [f32], target: f32) {
    let peak = samples.iter().fold(0f32, |acc, s| acc.max(s.abs()));
    if peak <= f32::EPSILON {
        return;
    }
    let gain = target / peak;
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

/// Root-mean-square level of an int16 frame, normalized to [0.0, 1.0].
pub fn rms_i16(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = f64::from(s) / 32_768.0;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}
