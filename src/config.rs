use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Which inference runtime executes the acoustic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Candle,
    Onnx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcousticModelConfig {
    pub model_path: String,
    pub config_path: String,
    pub vocab_path: String,
    /// `cpu`, `cuda`, `metal` or `auto`.
    pub device: String,
    pub expected_sample_rate_hz: u32,
    pub runtime: RuntimeKind,
}

impl AcousticModelConfig {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 16_000;

    /// Conventional file names inside a model directory.
    pub fn from_model_dir(dir: impl AsRef<Path>, runtime: RuntimeKind) -> Self {
        let dir = dir.as_ref();
        let weights = match runtime {
            RuntimeKind::Candle => "model.safetensors",
            RuntimeKind::Onnx => "model.onnx",
        };
        Self {
            model_path: dir.join(weights).to_string_lossy().into_owned(),
            config_path: dir.join("config.json").to_string_lossy().into_owned(),
            vocab_path: dir.join("vocab.json").to_string_lossy().into_owned(),
            runtime,
            ..Self::default()
        }
    }
}

impl Default for AcousticModelConfig {
    fn default() -> Self {
        Self {
            model_path: String::new(),
            config_path: String::new(),
            vocab_path: String::new(),
            device: "cpu".to_string(),
            expected_sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
            runtime: RuntimeKind::Candle,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Wav2Vec2ModelConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub conv_dim: Vec<usize>,
    pub conv_kernel: Vec<usize>,
    pub conv_stride: Vec<usize>,
    pub num_conv_pos_embeddings: usize,
    pub num_conv_pos_embedding_groups: usize,
    #[serde(default)]
    pub do_stable_layer_norm: bool,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
    pub pad_token_id: Option<usize>,
    pub vocab_size: usize,
    #[serde(default = "default_feat_norm")]
    pub feat_extract_norm: String,
    #[serde(default = "default_conv_bias")]
    pub conv_bias: bool,
}

fn default_eps() -> f64 {
    1e-5
}

fn default_feat_norm() -> String {
    "group".to_string()
}

fn default_conv_bias() -> bool {
    false
}

impl Wav2Vec2ModelConfig {
    pub(crate) fn load(path: &Path) -> Result<Self, ScoringError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ScoringError::config(format!(
                "cannot read acoustic model config {}: {e}",
                path.display()
            ))
        })?;
        let cfg: Self =
            serde_json::from_str(&data).map_err(|e| ScoringError::json("parse config.json", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ScoringError> {
        let layers = self.conv_dim.len();
        if layers == 0 || self.conv_kernel.len() != layers || self.conv_stride.len() != layers {
            return Err(ScoringError::config(format!(
                "conv_dim/conv_kernel/conv_stride must be non-empty and equal length (got {}, {}, {})",
                layers,
                self.conv_kernel.len(),
                self.conv_stride.len()
            )));
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(ScoringError::config(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        Ok(())
    }

    pub(crate) fn frame_stride_ms(&self, sample_rate: u32) -> f64 {
        let stride_samples: usize = self.conv_stride.iter().product();
        stride_samples as f64 / sample_rate as f64 * 1000.0
    }
}

/// Architecture of the trained rating regressor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RatingModelKind {
    /// `3 -> hidden_dim -> 1` with ReLU.
    Tiny { hidden_dim: usize },
    /// Cumulative-logit ordinal regressor over five stars.
    Ordinal { hidden_dims: Vec<usize> },
}

impl Default for RatingModelKind {
    fn default() -> Self {
        Self::Tiny { hidden_dim: 32 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub model_path: String,
    pub scaler_path: String,
    pub kind: RatingModelKind,
}

/// How PPG frames are compared before alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PpgDistance {
    #[default]
    Jsd,
    Cosine,
}

/// Tunable constants for the similarity metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub min_frames: usize,
    pub ppg_band: Option<usize>,
    pub ppg_downsample: usize,
    pub ppg_distance: PpgDistance,
    pub gop_tau: f64,
    pub gop_duration_weight: f64,
    pub gop_mismatch_penalty: f64,
    pub gop_gap_penalty: f64,
    pub gop_band: Option<usize>,
    pub gop_downsample: usize,
    pub gpe_relative_threshold: f64,
    pub gpe_absolute_threshold_hz: f64,
    pub semitone_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            min_frames: 5,
            ppg_band: Some(100),
            ppg_downsample: 3,
            ppg_distance: PpgDistance::Jsd,
            gop_tau: 1.0,
            gop_duration_weight: 0.01,
            gop_mismatch_penalty: 1.5,
            gop_gap_penalty: 0.5,
            gop_band: None,
            gop_downsample: 3,
            gpe_relative_threshold: 0.2,
            gpe_absolute_threshold_hz: 20.0,
            semitone_threshold: 3.0,
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.min_frames == 0 {
            return Err(ScoringError::config("min_frames must be at least 1"));
        }
        if !self.gop_tau.is_finite() || self.gop_tau <= 0.0 {
            return Err(ScoringError::config(format!(
                "gop_tau must be positive, got {}",
                self.gop_tau
            )));
        }
        if self.ppg_downsample == 0 || self.gop_downsample == 0 {
            return Err(ScoringError::config("downsample factors must be at least 1"));
        }
        let thresholds = [
            ("gop_mismatch_penalty", self.gop_mismatch_penalty),
            ("gop_gap_penalty", self.gop_gap_penalty),
            ("gop_duration_weight", self.gop_duration_weight),
            ("gpe_relative_threshold", self.gpe_relative_threshold),
            ("gpe_absolute_threshold_hz", self.gpe_absolute_threshold_hz),
            ("semitone_threshold", self.semitone_threshold),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(ScoringError::config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub peak_normalize: bool,
    pub target_peak_dbfs: f32,
    pub max_gain: f32,
    /// EBU R128 integrated-loudness normalization after the peak stage.
    pub loudness_normalize: bool,
    pub target_lufs: f64,
    /// Peak ceiling applied after the loudness gain.
    pub clip_ceiling: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            peak_normalize: true,
            target_peak_dbfs: -3.0,
            max_gain: 10.0,
            loudness_normalize: true,
            target_lufs: -16.0,
            clip_ceiling: 0.999,
        }
    }
}

impl AudioConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if !self.max_gain.is_finite() || self.max_gain <= 0.0 {
            return Err(ScoringError::config(format!(
                "max_gain must be positive, got {}",
                self.max_gain
            )));
        }
        if !self.target_peak_dbfs.is_finite() || !self.target_lufs.is_finite() {
            return Err(ScoringError::config("audio targets must be finite"));
        }
        if !(self.clip_ceiling > 0.0 && self.clip_ceiling <= 1.0) {
            return Err(ScoringError::config(format!(
                "clip_ceiling must lie in (0, 1], got {}",
                self.clip_ceiling
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub acoustic: AcousticModelConfig,
    /// Character-vocabulary CTC model used for WER; WER is skipped when absent.
    pub transcriber: Option<AcousticModelConfig>,
    pub predictor: PredictorConfig,
    pub metrics: MetricsConfig,
    pub audio: AudioConfig,
}

impl ScorerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScoringError> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ScoringError::io("read scorer config", e))?;
        serde_json::from_str(&data).map_err(|e| ScoringError::json("parse scorer config", e))
    }
}
