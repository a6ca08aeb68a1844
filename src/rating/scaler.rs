use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Per-feature standardization fitted at training time: `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ScoringError> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Identity transform over `dims` features.
    pub fn identity(dims: usize) -> Self {
        Self {
            mean: vec![0.0; dims],
            scale: vec![1.0; dims],
        }
    }

    /// Reads `{"mean": [...], "scale": [...]}`.
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ScoringError::config(format!("cannot read scaler {}: {e}", path.display()))
        })?;
        let scaler: Self = serde_json::from_str(&data)
            .map_err(|e| ScoringError::config(format!("invalid scaler {}: {e}", path.display())))?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> Result<(), ScoringError> {
        if self.mean.len() != self.scale.len() {
            return Err(ScoringError::config(format!(
                "scaler mean has {} entries but scale has {}",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self
            .mean
            .iter()
            .chain(&self.scale)
            .any(|v| !v.is_finite())
        {
            return Err(ScoringError::config("scaler contains non-finite values"));
        }
        Ok(())
    }

    pub fn dims(&self) -> usize {
        self.mean.len()
    }

    /// A zero scale (constant training feature) divides by one.
    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ScoringError> {
        if features.len() != self.dims() {
            return Err(ScoringError::invalid_input(format!(
                "expected {} features, got {}",
                self.dims(),
                features.len()
            )));
        }
        Ok(features
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect())
    }
}
