//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Clients stream PCM at whatever rate their capture stack produces
//! (commonly 44.1 or 48 kHz from browsers). The recorder and the engines
//! run at a fixed 16 kHz, so every session owns one `Resampler` keyed to
//! the rate the client last declared.
//!
//! When source rate == target rate the converter is a passthrough — no
//! rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::error;

use crate::audio::{f32_to_samples, samples_to_f32};
use crate::error::{Result, ScribaError};

/// Input frame count handed to rubato per process call.
/// 20 ms at 48 kHz; small enough to keep latency low, big enough to
/// amortize the polynomial filter setup.
const CHUNK: usize = 960;

/// Converts int16 mono PCM from one fixed sample rate to another.
pub struct Resampler {
    /// `None` when source rate == target rate (passthrough mode).
    inner: Option<FastFixedIn<f32>>,
    source_rate: u32,
    /// Holds partial input between calls until a full rubato chunk exists.
    pending: Vec<f32>,
    /// Pre-allocated rubato output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a converter from `source_rate` to `target_rate` (both Hz, mono).
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                inner: None,
                source_rate,
                pending: Vec::new(),
                output_buf: Vec::new(),
            });
        }

        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let inner = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, CHUNK, 1)
            .map_err(|e| ScribaError::Resample(format!("init {source_rate}->{target_rate}: {e}")))?;

        let max_out = inner.output_frames_max();
        tracing::info!(source_rate, target_rate, max_out, "resampling enabled");

        Ok(Self {
            inner: Some(inner),
            source_rate,
            pending: Vec::new(),
            output_buf: vec![vec![0f32; max_out]],
        })
    }

    /// The source rate this converter was built for.
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Returns `true` when no rate conversion occurs.
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Convert incoming int16 samples, returning converted output (may be
    /// empty while rubato accumulates a full input chunk).
    pub fn convert(&mut self, samples: &[i16]) -> Vec<i16> {
        let Some(ref mut inner) = self.inner else {
            return samples.to_vec();
        };

        self.pending.extend(samples_to_f32(samples));

        let mut result: Vec<f32> = Vec::new();
        while self.pending.len() >= CHUNK {
            let input = &self.pending[..CHUNK];
            match inner.process_into_buffer(&[input], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }
            self.pending.drain(..CHUNK);
        }

        f32_to_samples(&result)
    }
}

/// One-shot conversion of a complete buffer (upload path).
///
/// Unlike the streaming [`Resampler`], this pads the tail so no trailing
/// audio is lost to an incomplete chunk.
pub fn resample_buffer(samples: &[i16], source_rate: u32, target_rate: u32) -> Result<Vec<i16>> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }

    let mut rc = Resampler::new(source_rate, target_rate)?;
    let mut out = rc.convert(samples);
    // Flush: pad with silence up to one full chunk so the remainder drains.
    let pad = vec![0i16; CHUNK];
    out.extend(rc.convert(&pad));

    // Trim to the mathematically expected length (drop the padding's output).
    let expected =
        (samples.len() as u64 * u64::from(target_rate) / u64::from(source_rate)) as usize;
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = Resampler::new(16_000, 16_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<i16> = (0..480).map(|i| i as i16).collect();
        assert_eq!(rc.convert(&samples), samples);
    }

    #[test]
    fn ratio_48k_to_16k_shrinks_by_three() {
        let mut rc = Resampler::new(48_000, 16_000).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.convert(&vec![0i16; 960]);
        assert!(!out.is_empty());
        let expected = 320isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 10,
            "len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_chunk_returns_empty_until_full() {
        let mut rc = Resampler::new(48_000, 16_000).unwrap();
        assert!(rc.convert(&vec![0i16; 500]).is_empty());
        assert!(!rc.convert(&vec![0i16; 500]).is_empty());
    }

    #[test]
    fn buffer_resample_yields_expected_length() {
        let samples = vec![100i16; 44_100];
        let out = resample_buffer(&samples, 44_100, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }
}
