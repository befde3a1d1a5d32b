//! WAV decode/encode for the file-upload path.
//!
//! Uploads are decoded from memory, downmixed to mono, resampled to the
//! pipeline rate and written back out as a 16 kHz mono int16 WAV working
//! file for the engine.

use std::io::{Read, Seek, Write};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::audio::resample::resample_buffer;
use crate::audio::SAMPLE_RATE;
use crate::error::{Result, ScribaError};

/// Decode a WAV stream into int16 mono samples plus its native sample rate.
///
/// Multi-channel input is averaged down to mono. Both integer and float
/// sample formats are accepted.
pub fn decode_wav<R: Read>(reader: R) -> Result<(Vec<i16>, u32)> {
    let mut wav = WavReader::new(reader)
        .map_err(|e| ScribaError::AudioFormat(format!("wav decode: {e}")))?;
    let spec = wav.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<i16> = match spec.sample_format {
        SampleFormat::Int => wav
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ScribaError::AudioFormat(format!("wav samples: {e}")))?,
        SampleFormat::Float => wav
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32_767.0) as i16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ScribaError::AudioFormat(format!("wav samples: {e}")))?,
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    debug!(
        rate = spec.sample_rate,
        channels,
        samples = mono.len(),
        "decoded wav upload"
    );
    Ok((mono, spec.sample_rate))
}

/// Decode a WAV stream and convert it to 16 kHz mono int16.
pub fn decode_to_pipeline_rate<R: Read>(reader: R) -> Result<Vec<i16>> {
    let (samples, rate) = decode_wav(reader)?;
    resample_buffer(&samples, rate, SAMPLE_RATE)
}

fn pipeline_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write 16 kHz mono int16 samples as a WAV file at `path`.
pub fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let mut writer = WavWriter::create(path, pipeline_spec())
        .map_err(|e| ScribaError::AudioFormat(format!("wav create: {e}")))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| ScribaError::AudioFormat(format!("wav write: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| ScribaError::AudioFormat(format!("wav finalize: {e}")))?;
    Ok(())
}

/// Encode samples as an in-memory WAV (test helper and preview export).
pub fn encode_wav<W: Write + Seek>(writer: W, samples: &[i16], rate: u32) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut wav = WavWriter::new(writer, spec)
        .map_err(|e| ScribaError::AudioFormat(format!("wav create: {e}")))?;
    for &s in samples {
        wav.write_sample(s)
            .map_err(|e| ScribaError::AudioFormat(format!("wav write: {e}")))?;
    }
    wav.finalize()
        .map_err(|e| ScribaError::AudioFormat(format!("wav finalize: {e}")))?;
    Ok(())
}
