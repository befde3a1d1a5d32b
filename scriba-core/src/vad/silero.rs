//! Silero neural voice activity detector (ONNX).
//!
//! Wraps the Silero VAD model from <https://github.com/snakers4/silero-vad>
//! as the confirmatory stage of [`DualVad`](super::DualVad). Supports the
//! v3/v4 LSTM interface (separate `h`/`c` tensors) and the v5 GRU interface
//! (single `state` tensor); the mode is resolved from the session's declared
//! input/output names at load time.

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;
use tracing::{error, info, warn};

use super::FrameClassifier;
use crate::audio::samples_to_f32;
use crate::error::{Result, ScribaError};

/// Window size expected by Silero (samples at 16 kHz = 32 ms).
const WINDOW: usize = 512;
/// v3/v4 LSTM state: 2 layers × 1 batch × 64 units per tensor.
const LSTM_SIZE: usize = 128;
/// v5 GRU state: 2 layers × 1 batch × 128 units.
const GRU_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoMode {
    Lstm,
    Gru,
    Stateless,
}

/// Neural VAD stage backed by a Silero ONNX session.
pub struct SileroVad {
    session: ort::session::Session,
    io_mode: IoMode,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    h_name: Option<String>,
    c_name: Option<String>,
    hn_name: Option<String>,
    cn_name: Option<String>,
    state_name: Option<String>,
    state_out_name: Option<String>,
    h: Vec<f32>,
    c: Vec<f32>,
    state: Vec<f32>,
    threshold: f32,
    window_buf: Vec<f32>,
}

fn onnx_err(e: impl std::fmt::Display) -> ScribaError {
    ScribaError::OnnxSession(e.to_string())
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl SileroVad {
    /// Load the model from `path` with a speech-probability `threshold`.
    pub fn new(path: impl AsRef<Path>, threshold: f32) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScribaError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| onnx_err("silero model has no inputs"))?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);
        let h_name = resolve_name(&input_names, &["h", "state_h"]);
        let c_name = resolve_name(&input_names, &["c", "state_c"]);
        let state_name = resolve_name(&input_names, &["state", "h_0", "hidden"]);

        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| onnx_err("silero model has no outputs"))?;
        let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
        let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
        let state_out_name =
            resolve_name(&output_names, &["stateN", "state_out", "h_0_out", "hn_out"]);

        let io_mode =
            if h_name.is_some() && c_name.is_some() && hn_name.is_some() && cn_name.is_some() {
                IoMode::Lstm
            } else if state_name.is_some() {
                IoMode::Gru
            } else {
                IoMode::Stateless
            };

        info!(?path, threshold, ?io_mode, "silero vad loaded");

        Ok(Self {
            session,
            io_mode,
            input_name,
            sr_name,
            output_name,
            h_name,
            c_name,
            hn_name,
            cn_name,
            state_name,
            state_out_name,
            h: vec![0.0; LSTM_SIZE],
            c: vec![0.0; LSTM_SIZE],
            state: vec![0.0; GRU_SIZE],
            threshold,
            window_buf: Vec::new(),
        })
    }

    /// Run one 512-sample window; update recurrent state; return probability.
    fn run_window(&mut self, window: &[f32]) -> Result<f32> {
        debug_assert_eq!(window.len(), WINDOW);

        let input_arr =
            Array2::<f32>::from_shape_vec((1, WINDOW), window.to_vec()).map_err(onnx_err)?;
        let input_val = Value::from_array(input_arr).map_err(onnx_err)?;

        let mut inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, 16_000i64);
            let sr_val = Value::from_array(sr_arr).map_err(onnx_err)?;
            inputs.push((sr_name.clone(), sr_val.into()));
        }

        match self.io_mode {
            IoMode::Lstm => {
                let h_arr =
                    Array3::<f32>::from_shape_vec((2, 1, 64), self.h.clone()).map_err(onnx_err)?;
                let c_arr =
                    Array3::<f32>::from_shape_vec((2, 1, 64), self.c.clone()).map_err(onnx_err)?;
                if let (Some(h_name), Some(c_name)) = (&self.h_name, &self.c_name) {
                    inputs.push((h_name.clone(), Value::from_array(h_arr).map_err(onnx_err)?.into()));
                    inputs.push((c_name.clone(), Value::from_array(c_arr).map_err(onnx_err)?.into()));
                }
            }
            IoMode::Gru => {
                let state_arr = Array3::<f32>::from_shape_vec((2, 1, 128), self.state.clone())
                    .map_err(onnx_err)?;
                if let Some(state_name) = &self.state_name {
                    inputs.push((
                        state_name.clone(),
                        Value::from_array(state_arr).map_err(onnx_err)?.into(),
                    ));
                }
            }
            IoMode::Stateless => {}
        }

        let outputs = self.session.run(inputs).map_err(onnx_err)?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (_, prob_data) = prob_output.try_extract_tensor::<f32>().map_err(onnx_err)?;
        let prob = prob_data.first().copied().unwrap_or(0.0);

        match self.io_mode {
            IoMode::Lstm => {
                let names = (self.hn_name.as_deref(), self.cn_name.as_deref());
                if let (Some(hn), Some(cn)) = names {
                    if let (Some(hn_out), Some(cn_out)) = (outputs.get(hn), outputs.get(cn)) {
                        let (_, hn_data) =
                            hn_out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                        let (_, cn_data) =
                            cn_out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                        self.h = hn_data.to_vec();
                        self.c = cn_data.to_vec();
                    } else {
                        warn!("silero LSTM state outputs missing; switching to stateless");
                        self.io_mode = IoMode::Stateless;
                    }
                }
            }
            IoMode::Gru => {
                if let Some(name) = self.state_out_name.clone() {
                    if let Some(state_out) = outputs.get(name.as_str()) {
                        let (_, state_data) =
                            state_out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                        self.state = state_data.to_vec();
                    } else {
                        warn!("silero GRU state output missing; switching to stateless");
                        self.io_mode = IoMode::Stateless;
                    }
                }
            }
            IoMode::Stateless => {}
        }

        Ok(prob)
    }
}

impl FrameClassifier for SileroVad {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        self.window_buf.extend(samples_to_f32(frame));

        let mut any_speech = false;
        while self.window_buf.len() >= WINDOW {
            let window: Vec<f32> = self.window_buf[..WINDOW].to_vec();
            self.window_buf.drain(..WINDOW);
            match self.run_window(&window) {
                Ok(prob) if prob >= self.threshold => any_speech = true,
                Ok(_) => {}
                Err(e) => error!("silero inference error: {e}"),
            }
        }
        any_speech
    }

    fn reset(&mut self) {
        self.h.iter_mut().for_each(|v| *v = 0.0);
        self.c.iter_mut().for_each(|v| *v = 0.0);
        self.state.iter_mut().for_each(|v| *v = 0.0);
        self.window_buf.clear();
    }
}
