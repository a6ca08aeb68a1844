use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::{AcousticModelConfig, RuntimeKind, Wav2Vec2ModelConfig};
use crate::error::ScoringError;
use crate::model::Wav2Vec2Ctc;
use crate::pipeline::traits::AcousticBackend;
use crate::types::Posteriorgram;

/// Maps a device string to a candle device; `auto` tries CUDA, then Metal.
pub(crate) fn resolve_device(requested: &str) -> Result<Device, ScoringError> {
    match requested.to_ascii_lowercase().as_str() {
        "cpu" | "" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0)
            .map_err(|e| ScoringError::config(format!("CUDA device unavailable: {e}"))),
        "metal" => Device::new_metal(0)
            .map_err(|e| ScoringError::config(format!("Metal device unavailable: {e}"))),
        "auto" => {
            if candle_core::utils::cuda_is_available() {
                if let Ok(device) = Device::new_cuda(0) {
                    return Ok(device);
                }
            }
            if candle_core::utils::metal_is_available() {
                if let Ok(device) = Device::new_metal(0) {
                    return Ok(device);
                }
            }
            Ok(Device::Cpu)
        }
        other => Err(ScoringError::config(format!(
            "unsupported device '{other}', expected cpu, cuda, metal or auto"
        ))),
    }
}

pub(crate) fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

pub(crate) fn build_backend(
    config: &AcousticModelConfig,
    model_cfg: &Wav2Vec2ModelConfig,
) -> Result<Arc<dyn AcousticBackend>, ScoringError> {
    match config.runtime {
        RuntimeKind::Candle => {
            let device = resolve_device(&config.device)?;
            Ok(Arc::new(CandleAcousticBackend::load_with(
                config, model_cfg, &device,
            )?))
        }
        RuntimeKind::Onnx => build_onnx_backend(config),
    }
}

fn build_onnx_backend(
    config: &AcousticModelConfig,
) -> Result<Arc<dyn AcousticBackend>, ScoringError> {
    #[cfg(feature = "onnx")]
    {
        Ok(Arc::new(OnnxAcousticBackend::load(config)?))
    }

    #[cfg(not(feature = "onnx"))]
    {
        let _ = config;
        Err(ScoringError::config(
            "ONNX runtime support is disabled; enable the `onnx` cargo feature",
        ))
    }
}

/// wav2vec2 CTC model executed with candle.
pub struct CandleAcousticBackend {
    model: Wav2Vec2Ctc,
    device: Device,
}

impl CandleAcousticBackend {
    /// Loads `config.json` and safetensors weights named by `config`.
    pub fn load(config: &AcousticModelConfig) -> Result<Self, ScoringError> {
        let model_cfg = Wav2Vec2ModelConfig::load(Path::new(&config.config_path))?;
        let device = resolve_device(&config.device)?;
        Self::load_with(config, &model_cfg, &device)
    }

    pub(crate) fn load_with(
        config: &AcousticModelConfig,
        model_cfg: &Wav2Vec2ModelConfig,
        device: &Device,
    ) -> Result<Self, ScoringError> {
        let model_data = std::fs::read(&config.model_path).map_err(|e| {
            ScoringError::config(format!(
                "cannot read acoustic weights {}: {e}",
                config.model_path
            ))
        })?;
        let vb = VarBuilder::from_buffered_safetensors(model_data, DType::F32, device)
            .map_err(|e| ScoringError::config(format!("invalid safetensors: {e}")))?;
        let backend = Self::from_var_builder(model_cfg, vb, device.clone())?;

        tracing::info!(
            hidden_size = model_cfg.hidden_size,
            layers = model_cfg.num_hidden_layers,
            vocab = model_cfg.vocab_size,
            device = device_label(device),
            "wav2vec2 Candle backend loaded"
        );
        Ok(backend)
    }

    pub(crate) fn from_var_builder(
        model_cfg: &Wav2Vec2ModelConfig,
        vb: VarBuilder,
        device: Device,
    ) -> Result<Self, ScoringError> {
        let model = Wav2Vec2Ctc::load(model_cfg, vb).map_err(|e| {
            ScoringError::config(format!("weights do not match model config: {e}"))
        })?;
        Ok(Self { model, device })
    }
}

impl AcousticBackend for CandleAcousticBackend {
    fn infer(&self, normalized_audio: &[f32]) -> Result<Posteriorgram, ScoringError> {
        let audio = Tensor::from_vec(
            normalized_audio.to_vec(),
            (1, normalized_audio.len()),
            &self.device,
        )
        .map_err(|e| ScoringError::runtime("tensor creation", e))?;
        let log_probs = self
            .model
            .log_probs(&audio)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_dtype(DType::F32))
            .map_err(|e| ScoringError::runtime("forward pass", e))?;
        let rows: Vec<Vec<f32>> = log_probs
            .to_vec2()
            .map_err(|e| ScoringError::runtime("to_vec2", e))?;
        Posteriorgram::new(rows)
    }

    fn device_label(&self) -> String {
        device_label(&self.device).to_string()
    }
}

#[cfg(feature = "onnx")]
pub struct OnnxAcousticBackend {
    session: std::sync::Mutex<ort::session::Session>,
    device_label: String,
}

#[cfg(feature = "onnx")]
impl OnnxAcousticBackend {
    pub fn load(config: &AcousticModelConfig) -> Result<Self, ScoringError> {
        let device_label = parse_onnx_device(config.device.as_str())?;
        let execution_providers = onnx_execution_providers(device_label);
        let session = ort::session::Session::builder()
            .map_err(|e| ScoringError::runtime("onnx session builder", e))?
            .with_execution_providers(execution_providers)
            .map_err(|e| ScoringError::runtime("onnx execution providers", e))?
            .commit_from_file(Path::new(&config.model_path))
            .map_err(|e| {
                ScoringError::config(format!("cannot load ONNX model {}: {e}", config.model_path))
            })?;

        tracing::info!(
            inputs = session.inputs().len(),
            outputs = session.outputs().len(),
            model_path = %config.model_path,
            device = device_label,
            "wav2vec2 ONNX backend loaded"
        );

        Ok(Self {
            session: std::sync::Mutex::new(session),
            device_label: device_label.to_string(),
        })
    }
}

#[cfg(feature = "onnx")]
impl AcousticBackend for OnnxAcousticBackend {
    fn infer(&self, normalized_audio: &[f32]) -> Result<Posteriorgram, ScoringError> {
        let input = ort::value::TensorRef::from_array_view((
            [1usize, normalized_audio.len()],
            normalized_audio,
        ))
        .map_err(|e| ScoringError::runtime("onnx input tensor", e))?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| ScoringError::runtime("onnx session lock", "session mutex poisoned"))?;
        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| ScoringError::runtime("onnx forward pass", e))?;
        if outputs.len() == 0 {
            return Err(ScoringError::runtime(
                "onnx forward pass",
                "model produced no outputs",
            ));
        }
        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScoringError::runtime("onnx extract logits", e))?;
        let dims: Vec<i64> = shape.iter().copied().collect();
        logits_to_posteriorgram(&dims, logits)
    }

    fn device_label(&self) -> String {
        self.device_label.clone()
    }
}

#[cfg(feature = "onnx")]
fn onnx_execution_providers(device: &str) -> Vec<ort::ep::ExecutionProviderDispatch> {
    match device {
        "cuda" => vec![
            ort::ep::CUDA::default()
                .with_device_id(0)
                .build()
                .error_on_failure(),
            ort::ep::CPU::default().build(),
        ],
        _ => vec![ort::ep::CPU::default().build()],
    }
}

#[cfg(feature = "onnx")]
fn parse_onnx_device(device: &str) -> Result<&'static str, ScoringError> {
    if device.eq_ignore_ascii_case("cpu") {
        Ok("cpu")
    } else if device.eq_ignore_ascii_case("cuda") {
        Ok("cuda")
    } else {
        Err(ScoringError::config(format!(
            "unsupported ONNX device '{device}', expected 'cpu' or 'cuda'"
        )))
    }
}

/// Raw `[1, T, V]` or `[T, V]` logits to a log-softmax posteriorgram.
#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn logits_to_posteriorgram(dims: &[i64], logits: &[f32]) -> Result<Posteriorgram, ScoringError> {
    let (frames, vocab) = parse_logits_shape(dims, logits.len())?;
    let rows = (0..frames)
        .map(|t| log_softmax_row(&logits[t * vocab..(t + 1) * vocab]))
        .collect();
    Posteriorgram::new(rows)
}

#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn parse_logits_shape(dims: &[i64], logits_len: usize) -> Result<(usize, usize), ScoringError> {
    let dim = |value: i64, name: &str| {
        usize::try_from(value)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                ScoringError::invalid_input(format!(
                    "logits {name} dimension must be > 0, got {value}"
                ))
            })
    };
    let (frames, vocab) = match dims {
        [1, t, v] => (dim(*t, "time")?, dim(*v, "vocab")?),
        [batch, _, _] => {
            return Err(ScoringError::invalid_input(format!(
                "logits batch size must be 1, got {batch}"
            )))
        }
        [t, v] => (dim(*t, "time")?, dim(*v, "vocab")?),
        _ => {
            return Err(ScoringError::invalid_input(format!(
                "unsupported logits rank {}; expected [1, T, V] or [T, V]",
                dims.len()
            )))
        }
    };
    let expected = frames
        .checked_mul(vocab)
        .ok_or_else(|| ScoringError::invalid_input("logits shape is too large"))?;
    if expected != logits_len {
        return Err(ScoringError::invalid_input(format!(
            "logits shape/data mismatch: shape implies {expected} values, got {logits_len}"
        )));
    }
    Ok((frames, vocab))
}

#[cfg_attr(not(feature = "onnx"), allow(dead_code))]
fn log_softmax_row(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum_exp: f64 = logits
        .iter()
        .map(|&x| f64::from(x - max_logit).exp())
        .sum();
    let log_denom = max_logit + sum_exp.ln() as f32;
    logits.iter().map(|&x| x - log_denom).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_devices() {
        assert!(matches!(resolve_device("cpu").unwrap(), Device::Cpu));
        assert!(matches!(resolve_device("CPU").unwrap(), Device::Cpu));
        assert!(resolve_device("auto").is_ok());
        assert!(resolve_device("tpu").unwrap_err().is_configuration());
    }

    #[test]
    fn logits_shape_accepts_batched_and_flat() {
        assert_eq!(parse_logits_shape(&[1, 7, 32], 7 * 32).unwrap(), (7, 32));
        assert_eq!(parse_logits_shape(&[7, 32], 7 * 32).unwrap(), (7, 32));
    }

    #[test]
    fn logits_shape_rejects_bad_input() {
        let err = parse_logits_shape(&[2, 7, 32], 2 * 7 * 32).unwrap_err();
        assert!(err.to_string().contains("batch size must be 1"));
        let err = parse_logits_shape(&[7, 32], 7 * 32 - 1).unwrap_err();
        assert!(err.to_string().contains("shape/data mismatch"));
        assert!(parse_logits_shape(&[0, 32], 0).is_err());
    }

    #[test]
    fn log_softmax_rows_normalize() {
        let pg = logits_to_posteriorgram(&[2, 3], &[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
        for row in pg.rows() {
            let mass: f32 = row.iter().map(|x| x.exp()).sum();
            assert!((mass - 1.0).abs() < 1e-6);
        }
        assert_eq!(pg.argmax_ids(), vec![2, 0]);
    }

    #[test]
    fn onnx_runtime_without_feature_is_configuration_error() {
        if cfg!(feature = "onnx") {
            return;
        }
        let config = AcousticModelConfig {
            runtime: RuntimeKind::Onnx,
            ..AcousticModelConfig::default()
        };
        let err = build_onnx_backend(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_weights_are_configuration_error() {
        let config = AcousticModelConfig {
            model_path: "/nonexistent/model.safetensors".to_string(),
            config_path: "/nonexistent/config.json".to_string(),
            ..AcousticModelConfig::default()
        };
        let err = CandleAcousticBackend::load(&config).err().unwrap();
        assert!(err.is_configuration());
    }
}
