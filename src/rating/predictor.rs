use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use serde::{Deserialize, Serialize};

use crate::config::{PredictorConfig, RatingModelKind};
use crate::error::ScoringError;
use crate::rating::model::RatingModel;
use crate::rating::scaler::StandardScaler;
use crate::types::{Confidence, Metric, RatingPrediction, ScoreSheet};

pub const MIN_RATING: f64 = 1.0;
pub const MAX_RATING: f64 = 5.0;

/// Metrics the predictor consumes, in model input order.
pub const RATING_METRICS: [Metric; 3] = [Metric::Per, Metric::Ppg, Metric::Energy];

/// The three similarities fed to the rating model.
///
/// Serialized with the training-set column names (`score_PER`, ...); plain
/// metric names are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingFeatures {
    #[serde(rename = "score_PER", alias = "PER")]
    pub per: f64,
    #[serde(rename = "score_PPG", alias = "PPG")]
    pub ppg: f64,
    #[serde(rename = "score_Energy", alias = "Energy")]
    pub energy: f64,
}

impl RatingFeatures {
    pub const NAMES: [&'static str; 3] = ["score_PER", "score_PPG", "score_Energy"];

    pub fn new(per: f64, ppg: f64, energy: f64) -> Self {
        Self { per, ppg, energy }
    }

    pub fn from_sheet(sheet: &ScoreSheet) -> Result<Self, ScoringError> {
        let get = |metric: Metric| {
            sheet
                .get(metric)
                .ok_or_else(|| ScoringError::missing_feature(metric.as_str()))
        };
        Ok(Self::new(
            get(Metric::Per)?,
            get(Metric::Ppg)?,
            get(Metric::Energy)?,
        ))
    }

    /// Looks up each feature as `score_<Metric>` or `<Metric>`.
    pub fn from_map(map: &HashMap<String, f64>) -> Result<Self, ScoringError> {
        let get = |metric: Metric| {
            let name = metric.as_str();
            map.get(&format!("score_{name}"))
                .or_else(|| map.get(name))
                .copied()
                .ok_or_else(|| ScoringError::missing_feature(format!("score_{name}")))
        };
        Ok(Self::new(
            get(Metric::Per)?,
            get(Metric::Ppg)?,
            get(Metric::Energy)?,
        ))
    }

    fn to_row(self) -> Result<[f64; 3], ScoringError> {
        let row = [self.per, self.ppg, self.energy];
        if let Some((name, value)) = Self::NAMES
            .iter()
            .zip(row)
            .find(|(_, v)| !v.is_finite())
        {
            return Err(ScoringError::invalid_input(format!(
                "feature {name} has invalid value {value}"
            )));
        }
        Ok(row)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub features: Vec<String>,
    pub architecture: String,
    pub parameters: usize,
    pub output_range: (f64, f64),
}

impl RatingPrediction {
    /// Clamps a raw model output and derives the rounded values.
    ///
    /// Rounding is half-to-even, so 2.5 stars round to 2.
    pub fn from_raw(raw: f64) -> Self {
        let score = raw.clamp(MIN_RATING, MAX_RATING);
        let rounded = score.round_ties_even();
        Self {
            score,
            score_int: rounded as u8,
            score_half: (score * 2.0).round_ties_even() / 2.0,
            confidence: Confidence::from_distance((score - rounded).abs()),
        }
    }
}

/// Standard scaler plus a trained rating model.
pub struct RatingPredictor {
    scaler: StandardScaler,
    model: RatingModel,
}

impl RatingPredictor {
    pub fn load(config: &PredictorConfig) -> Result<Self, ScoringError> {
        let scaler = StandardScaler::load(Path::new(&config.scaler_path))?;
        let weights = std::fs::read(&config.model_path).map_err(|e| {
            ScoringError::config(format!(
                "cannot read rating model {}: {e}",
                config.model_path
            ))
        })?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, &Device::Cpu)
            .map_err(|e| ScoringError::config(format!("invalid rating model weights: {e}")))?;
        let predictor = Self::from_var_builder(&config.kind, scaler, vb)?;
        tracing::info!(
            architecture = %predictor.model.architecture(RATING_METRICS.len()),
            parameters = predictor.model.parameter_count(),
            "rating predictor loaded"
        );
        Ok(predictor)
    }

    pub fn from_var_builder(
        kind: &RatingModelKind,
        scaler: StandardScaler,
        vb: VarBuilder,
    ) -> Result<Self, ScoringError> {
        if scaler.dims() != RATING_METRICS.len() {
            return Err(ScoringError::config(format!(
                "scaler has {} features, the rating model takes {}",
                scaler.dims(),
                RATING_METRICS.len()
            )));
        }
        let model = RatingModel::load(kind, RATING_METRICS.len(), vb).map_err(|e| {
            ScoringError::config(format!("rating model weights do not match {kind:?}: {e}"))
        })?;
        Ok(Self { scaler, model })
    }

    pub fn predict(&self, features: &RatingFeatures) -> Result<RatingPrediction, ScoringError> {
        let scaled = self.scaler.transform(&features.to_row()?)?;
        let raw = self
            .model
            .predict(&scaled)
            .map_err(|e| ScoringError::runtime("rating model forward", e))?;
        if !raw.is_finite() {
            return Err(ScoringError::runtime(
                "rating model forward",
                format!("non-finite output {raw}"),
            ));
        }
        let prediction = RatingPrediction::from_raw(raw);
        tracing::debug!(
            per = features.per,
            ppg = features.ppg,
            energy = features.energy,
            raw,
            score = prediction.score,
            "rating predicted"
        );
        Ok(prediction)
    }

    pub fn predict_batch(
        &self,
        batch: &[RatingFeatures],
    ) -> Result<Vec<RatingPrediction>, ScoringError> {
        batch.iter().map(|f| self.predict(f)).collect()
    }

    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            features: RatingFeatures::NAMES.iter().map(|s| s.to_string()).collect(),
            architecture: self.model.architecture(RATING_METRICS.len()),
            parameters: self.model.parameter_count(),
            output_range: (MIN_RATING, MAX_RATING),
        }
    }
}

impl std::fmt::Debug for RatingPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatingPredictor")
            .field("scaler", &self.scaler)
            .field("architecture", &self.model.architecture(RATING_METRICS.len()))
            .finish()
    }
}
