use crate::acoustic::extractor::PosteriorExtractor;
use crate::acoustic::registry::ModelRegistry;
use crate::config::{AcousticModelConfig, AudioConfig};
use crate::ctc::greedy_transcript;
use crate::error::ScoringError;
use crate::pipeline::traits::Transcriber;
use crate::types::Waveform;

/// Greedy CTC transcription with a character-vocabulary wav2vec2 model.
#[derive(Debug, Clone)]
pub struct CtcTranscriber {
    extractor: PosteriorExtractor,
}

impl CtcTranscriber {
    pub fn new(extractor: PosteriorExtractor) -> Self {
        Self { extractor }
    }

    pub fn load(
        config: &AcousticModelConfig,
        audio: &AudioConfig,
        registry: &ModelRegistry,
    ) -> Result<Self, ScoringError> {
        PosteriorExtractor::load(config, audio, registry).map(Self::new)
    }
}

impl Transcriber for CtcTranscriber {
    fn transcribe(&self, waveform: &Waveform) -> Result<String, ScoringError> {
        let posteriorgram = self.extractor.posteriorgram(waveform)?;
        let vocab = self.extractor.vocab();
        let text = greedy_transcript(
            &posteriorgram.argmax_ids(),
            vocab.blank_id(),
            vocab.word_separator(),
            |id| vocab.symbol(id),
        );
        Ok(text.to_lowercase())
    }
}
