use std::path::Path;
use std::sync::Arc;

use crate::acoustic::{CtcTranscriber, ModelRegistry, PhonemeVocab, PosteriorExtractor};
use crate::config::ScorerConfig;
use crate::error::ScoringError;
use crate::pipeline::scorer::{PronunciationScorer, PronunciationScorerParts};
use crate::pipeline::traits::{AcousticBackend, ProsodyExtractor, Transcriber};
use crate::prosody::AutocorrelationPitchTracker;
use crate::rating::RatingPredictor;

pub struct PronunciationScorerBuilder {
    config: ScorerConfig,
    registry: Option<Arc<ModelRegistry>>,
    acoustic_backend: Option<Arc<dyn AcousticBackend>>,
    vocab: Option<PhonemeVocab>,
    predictor: Option<RatingPredictor>,
    transcriber: Option<Box<dyn Transcriber>>,
    prosody_extractor: Option<Box<dyn ProsodyExtractor>>,
}

impl PronunciationScorerBuilder {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            registry: None,
            acoustic_backend: None,
            vocab: None,
            predictor: None,
            transcriber: None,
            prosody_extractor: None,
        }
    }

    /// Shares loaded acoustic models with other scorers.
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_acoustic_backend(mut self, backend: Arc<dyn AcousticBackend>) -> Self {
        self.acoustic_backend = Some(backend);
        self
    }

    pub fn with_vocab(mut self, vocab: PhonemeVocab) -> Self {
        self.vocab = Some(vocab);
        self
    }

    pub fn with_predictor(mut self, predictor: RatingPredictor) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Box<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_prosody_extractor(mut self, extractor: Box<dyn ProsodyExtractor>) -> Self {
        self.prosody_extractor = Some(extractor);
        self
    }

    pub fn build(self) -> Result<PronunciationScorer, ScoringError> {
        self.config.metrics.validate()?;
        self.config.audio.validate()?;
        let registry = self.registry.unwrap_or_default();
        let acoustic = &self.config.acoustic;

        let extractor = match self.acoustic_backend {
            Some(backend) => {
                let vocab = match self.vocab {
                    Some(vocab) => vocab,
                    None => PhonemeVocab::load(Path::new(&acoustic.vocab_path), None)?,
                };
                PosteriorExtractor::new(
                    backend,
                    vocab,
                    acoustic.expected_sample_rate_hz,
                    self.config.audio.clone(),
                )
            }
            None => PosteriorExtractor::load(acoustic, &self.config.audio, &registry)?,
        };

        let predictor = match self.predictor {
            Some(predictor) => predictor,
            None => RatingPredictor::load(&self.config.predictor)?,
        };

        let transcriber = match (self.transcriber, &self.config.transcriber) {
            (Some(transcriber), _) => Some(transcriber),
            (None, Some(cfg)) => Some(Box::new(CtcTranscriber::load(
                cfg,
                &self.config.audio,
                &registry,
            )?) as Box<dyn Transcriber>),
            (None, None) => None,
        };

        let scorer = PronunciationScorer::from_parts(PronunciationScorerParts {
            extractor,
            predictor,
            transcriber,
            prosody: self
                .prosody_extractor
                .unwrap_or_else(|| Box::new(AutocorrelationPitchTracker::default())),
            metrics: self.config.metrics,
        });
        tracing::info!(capabilities = ?scorer.capabilities(), "pronunciation scorer ready");
        Ok(scorer)
    }
}

impl PronunciationScorer {
    pub fn builder(config: ScorerConfig) -> PronunciationScorerBuilder {
        PronunciationScorerBuilder::new(config)
    }

    /// Loads every model named by `config`.
    pub fn new(config: ScorerConfig) -> Result<Self, ScoringError> {
        PronunciationScorerBuilder::new(config).build()
    }
}
