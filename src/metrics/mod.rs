//! Reference-vs-test similarity metrics.
//!
//! Every similarity lies in `[0, 1]`; WER is an unbounded error rate.
//! Inputs too short to assess score `0.0` instead of failing.

pub mod gop;
pub mod per;
pub mod ppg;
pub mod prosody;
pub mod wer;

pub use gop::{gop_similarity, gops_from_spans, phoneme_alignment_similarity};
pub use per::{per_similarity, phoneme_error_rate};
pub use ppg::{cosine_distance, jensen_shannon_divergence, ppg_similarity};
pub use prosody::{align_tracks, energy_similarity, prosody_scores, AlignedProsody, ProsodyScores};
pub use wer::{normalize_text, transcribed_wer, word_error_rate};

/// Clamps to `[0, 1]`; NaN maps to `0.0`.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
