use std::path::Path;
use std::sync::Arc;

use crate::acoustic::backend::build_backend;
use crate::acoustic::registry::ModelRegistry;
use crate::acoustic::vocab::PhonemeVocab;
use crate::audio::{normalize_zero_mean_unit_var, preprocess, resample};
use crate::config::{AcousticModelConfig, AudioConfig, Wav2Vec2ModelConfig};
use crate::ctc::spans_from_posteriorgram;
use crate::error::ScoringError;
use crate::pipeline::traits::AcousticBackend;
use crate::types::{PhonemeSpan, Posteriorgram, Waveform};

/// Waveform to `(posteriorgram, phoneme spans)` with a shared acoustic backend.
#[derive(Clone)]
pub struct PosteriorExtractor {
    backend: Arc<dyn AcousticBackend>,
    vocab: Arc<PhonemeVocab>,
    sample_rate_hz: u32,
    audio: AudioConfig,
}

impl PosteriorExtractor {
    pub fn new(
        backend: Arc<dyn AcousticBackend>,
        vocab: PhonemeVocab,
        sample_rate_hz: u32,
        audio: AudioConfig,
    ) -> Self {
        Self {
            backend,
            vocab: Arc::new(vocab),
            sample_rate_hz,
            audio,
        }
    }

    /// Loads the vocabulary and fetches (or loads) the model through `registry`.
    pub fn load(
        config: &AcousticModelConfig,
        audio: &AudioConfig,
        registry: &ModelRegistry,
    ) -> Result<Self, ScoringError> {
        if config.expected_sample_rate_hz == 0 {
            return Err(ScoringError::config("expected_sample_rate_hz must be positive"));
        }
        let model_cfg = Wav2Vec2ModelConfig::load(Path::new(&config.config_path))?;
        let vocab = PhonemeVocab::load(Path::new(&config.vocab_path), model_cfg.pad_token_id)?;
        if vocab.len() > model_cfg.vocab_size {
            return Err(ScoringError::config(format!(
                "vocabulary has {} ids but the model emits {}",
                vocab.len(),
                model_cfg.vocab_size
            )));
        }
        let key = format!(
            "{:?}:{}:{}",
            config.runtime,
            config.device.to_ascii_lowercase(),
            config.model_path
        );
        let backend = registry.get_or_load(&key, || build_backend(config, &model_cfg))?;

        tracing::info!(
            vocab = vocab.len(),
            blank = vocab.blank_id(),
            frame_ms = model_cfg.frame_stride_ms(config.expected_sample_rate_hz),
            device = %backend.device_label(),
            "posterior extractor ready"
        );
        Ok(Self::new(
            backend,
            vocab,
            config.expected_sample_rate_hz,
            audio.clone(),
        ))
    }

    pub fn vocab(&self) -> &PhonemeVocab {
        &self.vocab
    }

    pub fn blank_id(&self) -> usize {
        self.vocab.blank_id()
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn device_label(&self) -> String {
        self.backend.device_label()
    }

    /// Resamples to the model rate and applies the configured peak and
    /// loudness normalization.
    pub fn prepare(&self, waveform: &Waveform) -> Result<Waveform, ScoringError> {
        if waveform.is_empty() {
            return Err(ScoringError::invalid_input("empty waveform"));
        }
        if waveform.sample_rate_hz == self.sample_rate_hz {
            return preprocess(waveform, &self.audio);
        }
        tracing::warn!(
            from = waveform.sample_rate_hz,
            to = self.sample_rate_hz,
            "resampling input to the acoustic model rate"
        );
        preprocess(&resample(waveform, self.sample_rate_hz)?, &self.audio)
    }

    /// Prepares `waveform` and runs the acoustic model.
    pub fn posteriorgram(&self, waveform: &Waveform) -> Result<Posteriorgram, ScoringError> {
        self.posteriorgram_prepared(&self.prepare(waveform)?)
    }

    /// Runs the acoustic model on output of [`Self::prepare`].
    pub fn posteriorgram_prepared(
        &self,
        prepared: &Waveform,
    ) -> Result<Posteriorgram, ScoringError> {
        if prepared.is_empty() {
            return Err(ScoringError::invalid_input("empty waveform"));
        }
        if prepared.sample_rate_hz != self.sample_rate_hz {
            return Err(ScoringError::invalid_input(format!(
                "prepared waveform is at {} Hz, the model expects {} Hz",
                prepared.sample_rate_hz, self.sample_rate_hz
            )));
        }
        let normalized = normalize_zero_mean_unit_var(&prepared.samples);
        let posteriorgram = self.backend.infer(&normalized)?;
        if posteriorgram.vocab_size() < self.vocab.len() {
            return Err(ScoringError::runtime(
                "acoustic inference",
                format!(
                    "model emitted {} classes for a {}-token vocabulary",
                    posteriorgram.vocab_size(),
                    self.vocab.len()
                ),
            ));
        }
        Ok(posteriorgram)
    }

    pub fn extract(
        &self,
        waveform: &Waveform,
    ) -> Result<(Posteriorgram, Vec<PhonemeSpan>), ScoringError> {
        self.extract_prepared(&self.prepare(waveform)?)
    }

    pub fn extract_prepared(
        &self,
        prepared: &Waveform,
    ) -> Result<(Posteriorgram, Vec<PhonemeSpan>), ScoringError> {
        let posteriorgram = self.posteriorgram_prepared(prepared)?;
        let spans = spans_from_posteriorgram(&posteriorgram, self.vocab.blank_id());
        tracing::debug!(
            frames = posteriorgram.num_frames(),
            spans = spans.len(),
            "posteriors extracted"
        );
        Ok((posteriorgram, spans))
    }

    pub fn phonemes(&self, spans: &[PhonemeSpan]) -> Vec<String> {
        self.vocab.phonemes(spans)
    }
}

impl std::fmt::Debug for PosteriorExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PosteriorExtractor")
            .field("device", &self.backend.device_label())
            .field("vocab", &self.vocab.len())
            .field("sample_rate_hz", &self.sample_rate_hz)
            .finish()
    }
}
