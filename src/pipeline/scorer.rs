use std::path::Path;

use serde::Serialize;

use crate::acoustic::PosteriorExtractor;
use crate::audio::load_waveform;
use crate::config::MetricsConfig;
use crate::error::ScoringError;
use crate::metrics::{
    energy_similarity, gop_similarity, per_similarity, ppg_similarity, prosody_scores,
    transcribed_wer,
};
use crate::pipeline::traits::{ProsodyExtractor, Transcriber};
use crate::rating::{RatingFeatures, RatingPredictor};
use crate::types::{
    Metric, PhonemeSpan, Posteriorgram, ProsodyTrack, RatingPrediction, ScoreSheet, Waveform,
};

/// Optional backends detected when the scorer was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub device: String,
    pub wer: bool,
    pub onnx_runtime: bool,
}

/// One decoded recording: posteriors, spans and their phoneme symbols.
#[derive(Debug, Clone)]
pub struct DecodedRecording {
    pub posteriorgram: Posteriorgram,
    pub spans: Vec<PhonemeSpan>,
    pub phonemes: Vec<String>,
}

/// Reference-vs-test scoring with every model loaded once at construction.
pub struct PronunciationScorer {
    extractor: PosteriorExtractor,
    predictor: RatingPredictor,
    transcriber: Option<Box<dyn Transcriber>>,
    prosody: Box<dyn ProsodyExtractor>,
    metrics: MetricsConfig,
    capabilities: Capabilities,
}

pub(crate) struct PronunciationScorerParts {
    pub extractor: PosteriorExtractor,
    pub predictor: RatingPredictor,
    pub transcriber: Option<Box<dyn Transcriber>>,
    pub prosody: Box<dyn ProsodyExtractor>,
    pub metrics: MetricsConfig,
}

impl PronunciationScorer {
    pub(crate) fn from_parts(parts: PronunciationScorerParts) -> Self {
        let capabilities = Capabilities {
            device: parts.extractor.device_label(),
            wer: parts.transcriber.is_some(),
            onnx_runtime: cfg!(feature = "onnx"),
        };
        Self {
            extractor: parts.extractor,
            predictor: parts.predictor,
            transcriber: parts.transcriber,
            prosody: parts.prosody,
            metrics: parts.metrics,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn metrics_config(&self) -> &MetricsConfig {
        &self.metrics
    }

    pub fn extractor(&self) -> &PosteriorExtractor {
        &self.extractor
    }

    pub fn predictor(&self) -> &RatingPredictor {
        &self.predictor
    }

    pub fn decode(&self, waveform: &Waveform) -> Result<DecodedRecording, ScoringError> {
        self.decode_prepared(&self.extractor.prepare(waveform)?)
    }

    fn decode_prepared(&self, prepared: &Waveform) -> Result<DecodedRecording, ScoringError> {
        let (posteriorgram, spans) = self.extractor.extract_prepared(prepared)?;
        let phonemes = self.extractor.phonemes(&spans);
        Ok(DecodedRecording {
            posteriorgram,
            spans,
            phonemes,
        })
    }

    /// Fused 1-5 rating of two audio files.
    pub fn score(
        &self,
        reference_path: impl AsRef<Path>,
        test_path: impl AsRef<Path>,
    ) -> Result<f64, ScoringError> {
        let reference = load_waveform(reference_path)?;
        let test = load_waveform(test_path)?;
        self.score_waveforms(&reference, &test)
    }

    pub fn score_waveforms(
        &self,
        reference: &Waveform,
        test: &Waveform,
    ) -> Result<f64, ScoringError> {
        self.rate(reference, test).map(|p| p.score)
    }

    /// Computes only the predictor's features, then the rating.
    pub fn rate(
        &self,
        reference: &Waveform,
        test: &Waveform,
    ) -> Result<RatingPrediction, ScoringError> {
        let features = self.rating_features(reference, test)?;
        self.predictor.predict(&features)
    }

    pub fn rating_features(
        &self,
        reference: &Waveform,
        test: &Waveform,
    ) -> Result<RatingFeatures, ScoringError> {
        let reference = self.extractor.prepare(reference)?;
        let test = self.extractor.prepare(test)?;
        let reference_decoded = self.decode_prepared(&reference)?;
        let test_decoded = self.decode_prepared(&test)?;
        let per = per_similarity(&reference_decoded.phonemes, &test_decoded.phonemes);
        let ppg = ppg_similarity(
            &reference_decoded.posteriorgram,
            &test_decoded.posteriorgram,
            self.extractor.blank_id(),
            &self.metrics,
        )?;
        let (reference_track, test_track) = self.prosody_tracks(&reference, &test)?;
        let energy = energy_similarity(&reference_track, &test_track, &self.metrics)?;
        tracing::debug!(per, ppg, energy, "rating features");
        Ok(RatingFeatures::new(per, ppg, energy))
    }

    pub fn predict_rating(
        &self,
        features: &RatingFeatures,
    ) -> Result<RatingPrediction, ScoringError> {
        self.predictor.predict(features)
    }

    /// Every metric for two audio files.
    pub fn score_all(
        &self,
        reference_path: impl AsRef<Path>,
        test_path: impl AsRef<Path>,
    ) -> Result<ScoreSheet, ScoringError> {
        let reference = load_waveform(reference_path)?;
        let test = load_waveform(test_path)?;
        self.score_all_waveforms(&reference, &test, None)
    }

    /// Every metric; one that fails is logged and left out of the sheet.
    ///
    /// Both recordings are prepared once (rate, peak and loudness) and every
    /// acoustic and prosodic metric reads the prepared audio. Acoustic
    /// extraction itself is required and its errors propagate.
    /// `reference_text`, when given, replaces the reference transcription
    /// for WER.
    pub fn score_all_waveforms(
        &self,
        reference: &Waveform,
        test: &Waveform,
        reference_text: Option<&str>,
    ) -> Result<ScoreSheet, ScoringError> {
        let prepared_reference = self.extractor.prepare(reference)?;
        let prepared_test = self.extractor.prepare(test)?;
        let reference_decoded = self.decode_prepared(&prepared_reference)?;
        let test_decoded = self.decode_prepared(&prepared_test)?;
        let blank_id = self.extractor.blank_id();
        let mut sheet = ScoreSheet::new();

        sheet.insert(
            Metric::Per,
            per_similarity(&reference_decoded.phonemes, &test_decoded.phonemes),
        );
        record(
            &mut sheet,
            Metric::Ppg,
            ppg_similarity(
                &reference_decoded.posteriorgram,
                &test_decoded.posteriorgram,
                blank_id,
                &self.metrics,
            ),
        );
        record(
            &mut sheet,
            Metric::Gop,
            gop_similarity(
                (&reference_decoded.posteriorgram, &reference_decoded.spans),
                (&test_decoded.posteriorgram, &test_decoded.spans),
                blank_id,
                &self.metrics,
            ),
        );

        match self
            .prosody_tracks(&prepared_reference, &prepared_test)
            .and_then(|(r, t)| prosody_scores(&r, &t, &self.metrics))
        {
            Ok(scores) => scores.insert_into(&mut sheet),
            Err(err) => tracing::warn!(error = %err, "prosodic metrics unavailable"),
        }

        match &self.transcriber {
            Some(transcriber) => record(
                &mut sheet,
                Metric::Wer,
                transcribed_wer(transcriber.as_ref(), reference, test, reference_text),
            ),
            None => tracing::debug!("no transcriber configured; WER skipped"),
        }

        tracing::info!(
            computed = sheet.len(),
            missing = ?sheet.missing(),
            "full metric sheet"
        );
        Ok(sheet)
    }

    fn prosody_tracks(
        &self,
        reference: &Waveform,
        test: &Waveform,
    ) -> Result<(ProsodyTrack, ProsodyTrack), ScoringError> {
        let reference_track = self.prosody.extract(reference)?;
        let test_track = self.prosody.extract(test)?;
        reference_track.check_lengths()?;
        test_track.check_lengths()?;
        Ok((reference_track, test_track))
    }
}

fn record(sheet: &mut ScoreSheet, metric: Metric, value: Result<f64, ScoringError>) {
    match value {
        Ok(v) => sheet.insert(metric, v),
        Err(err) => tracing::warn!(%metric, error = %err, "metric failed; leaving it out"),
    }
}

impl std::fmt::Debug for PronunciationScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PronunciationScorer")
            .field("extractor", &self.extractor)
            .field("predictor", &self.predictor)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
