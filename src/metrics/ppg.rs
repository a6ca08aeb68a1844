//! Posteriorgram similarity: frame distance matrix, DTW, `exp(-cost)`.

use std::f64::consts::LN_2;

use crate::alignment::{dtw_sequences, Band};
use crate::config::{MetricsConfig, PpgDistance};
use crate::error::ScoringError;
use crate::metrics::clamp_unit;
use crate::types::Posteriorgram;

const JSD_EPS: f64 = 1e-12;
const COSINE_EPS: f64 = 1e-9;

/// Jensen-Shannon divergence in nats, bounded to `[0, ln 2]`.
pub fn jensen_shannon_divergence(p: &[f64], q: &[f64]) -> f64 {
    let mut kl_pm = 0.0;
    let mut kl_qm = 0.0;
    for (&pi, &qi) in p.iter().zip(q) {
        let m = 0.5 * (pi + qi);
        let log_m = (m + JSD_EPS).ln();
        kl_pm += (pi + JSD_EPS) * ((pi + JSD_EPS).ln() - log_m);
        kl_qm += (qi + JSD_EPS) * ((qi + JSD_EPS).ln() - log_m);
    }
    (0.5 * (kl_pm + kl_qm)).clamp(0.0, LN_2)
}

/// `1 - cos(p, q)`, in `[0, 1]` for non-negative vectors.
pub fn cosine_distance(p: &[f64], q: &[f64]) -> f64 {
    let dot: f64 = p.iter().zip(q).map(|(a, b)| a * b).sum();
    let norm_p = p.iter().map(|a| a * a).sum::<f64>().sqrt();
    let norm_q = q.iter().map(|b| b * b).sum::<f64>().sqrt();
    (1.0 - dot / (norm_p * norm_q + COSINE_EPS)).clamp(0.0, 1.0)
}

/// PPG similarity between two posteriorgrams of the same vocabulary.
///
/// The blank column is removed and each frame renormalized before frames are
/// compared. Returns `0.0` when either side has fewer than
/// `config.min_frames` frames (checked before downsampling).
pub fn ppg_similarity(
    reference: &Posteriorgram,
    test: &Posteriorgram,
    blank_id: usize,
    config: &MetricsConfig,
) -> Result<f64, ScoringError> {
    if reference.num_frames() < config.min_frames || test.num_frames() < config.min_frames {
        tracing::warn!(
            reference_frames = reference.num_frames(),
            test_frames = test.num_frames(),
            min_frames = config.min_frames,
            "ppg: posteriorgram too short to assess"
        );
        return Ok(0.0);
    }
    if reference.vocab_size() != test.vocab_size() {
        return Err(ScoringError::invalid_input(format!(
            "posteriorgram vocabularies differ: {} vs {}",
            reference.vocab_size(),
            test.vocab_size()
        )));
    }

    let a = reference
        .downsample(config.ppg_downsample)
        .probabilities_without(blank_id);
    let b = test
        .downsample(config.ppg_downsample)
        .probabilities_without(blank_id);

    let distance = match config.ppg_distance {
        PpgDistance::Jsd => jensen_shannon_divergence,
        PpgDistance::Cosine => cosine_distance,
    };
    let alignment = dtw_sequences(&a, &b, Band::from_width(config.ppg_band), |p, q| {
        distance(p, q)
    })?;

    let similarity = clamp_unit((-alignment.normalized_cost).exp());
    tracing::debug!(
        frames_a = a.len(),
        frames_b = b.len(),
        band = ?alignment.band_width,
        cost = alignment.normalized_cost,
        similarity,
        "ppg"
    );
    Ok(similarity)
}
