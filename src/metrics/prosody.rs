//! Pitch, voicing and energy similarities over DTW-aligned prosody tracks.

use serde::Serialize;

use crate::alignment::{dtw_sequences, Band};
use crate::config::MetricsConfig;
use crate::error::ScoringError;
use crate::metrics::clamp_unit;
use crate::types::{Metric, ProsodyTrack, ScoreSheet};

const NORM_FLOOR: f64 = 1e-6;
const F0_FLOOR_HZ: f64 = 1e-10;

/// Two tracks resampled onto a shared DTW path; both have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedProsody {
    pub reference: ProsodyTrack,
    pub test: ProsodyTrack,
}

fn peak_normalized(values: &[f64]) -> Vec<f64> {
    let clean: Vec<f64> = values
        .iter()
        .map(|&v| if v.is_finite() { v } else { 0.0 })
        .collect();
    let peak = clean.iter().fold(0.0f64, |acc, v| acc.max(v.abs())).max(NORM_FLOOR);
    clean.into_iter().map(|v| v / peak).collect()
}

fn frame_features(track: &ProsodyTrack) -> Vec<[f64; 3]> {
    let f0 = peak_normalized(&track.f0_hz);
    let intensity = peak_normalized(&track.intensity_db);
    f0.into_iter()
        .zip(intensity)
        .zip(&track.voiced)
        .map(|((f, i), &v)| [f, i, if v { 1.0 } else { 0.0 }])
        .collect()
}

fn euclidean(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

fn gather(track: &ProsodyTrack, indices: impl Iterator<Item = usize>) -> ProsodyTrack {
    let mut out = ProsodyTrack::default();
    for i in indices {
        out.f0_hz.push(track.f0_hz[i]);
        out.intensity_db.push(track.intensity_db[i]);
        out.voiced.push(track.voiced[i]);
    }
    out
}

/// DTW-aligns `[f0, intensity, voiced]` frames (f0 and intensity scaled by
/// their peak magnitude) under the automatic Sakoe-Chiba band.
pub fn align_tracks(
    reference: &ProsodyTrack,
    test: &ProsodyTrack,
) -> Result<AlignedProsody, ScoringError> {
    reference.check_lengths()?;
    test.check_lengths()?;
    let alignment = dtw_sequences(
        &frame_features(reference),
        &frame_features(test),
        Band::Auto,
        euclidean,
    )?;
    Ok(AlignedProsody {
        reference: gather(reference, alignment.path.iter().map(|&(i, _)| i)),
        test: gather(test, alignment.path.iter().map(|&(_, j)| j)),
    })
}

fn is_gross_error(f0_ref: f64, f0_test: f64, relative: f64, absolute_hz: f64) -> bool {
    let err = (f0_test - f0_ref).abs();
    err / f0_ref.max(F0_FLOOR_HZ) > relative || err > absolute_hz
}

fn rate(flags: impl Iterator<Item = bool>) -> Option<f64> {
    let (hits, total) = flags.fold((0usize, 0usize), |(h, t), f| (h + usize::from(f), t + 1));
    (total > 0).then(|| hits as f64 / total as f64)
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    } else {
        values[mid]
    }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a) * (x - mean_a);
        var_b += (y - mean_b) * (y - mean_b);
    }
    cov / (var_a * var_b).sqrt()
}

impl AlignedProsody {
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    fn frames(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.len()).map(|k| (k, k))
    }

    /// `(f0_ref, f0_test)` on frames voiced in both with positive pitch.
    fn joint_pitch(&self) -> Vec<(f64, f64)> {
        self.frames()
            .filter(|&(i, j)| self.reference.voiced[i] && self.test.voiced[j])
            .map(|(i, j)| (self.reference.f0_hz[i], self.test.f0_hz[j]))
            .filter(|&(r, t)| r > 0.0 && t > 0.0)
            .collect()
    }

    /// Fraction of frames whose voicing decisions disagree.
    pub fn voicing_decision_error(&self) -> f64 {
        rate(self.frames().map(|(i, j)| self.reference.voiced[i] != self.test.voiced[j]))
            .unwrap_or(1.0)
    }

    /// Gross pitch error rate on jointly voiced frames; `1.0` when there are none.
    pub fn gross_pitch_error(&self, relative: f64, absolute_hz: f64) -> f64 {
        rate(
            self.joint_pitch()
                .into_iter()
                .map(|(r, t)| is_gross_error(r, t, relative, absolute_hz)),
        )
        .unwrap_or(1.0)
    }

    /// Rate of semitone deviations above `threshold`; `1.0` without jointly voiced frames.
    pub fn semitone_error(&self, threshold: f64) -> f64 {
        rate(
            self.joint_pitch()
                .into_iter()
                .map(|(r, t)| (t.log2() - r.log2()).abs() * 12.0 > threshold),
        )
        .unwrap_or(1.0)
    }

    /// Like [`Self::semitone_error`] after removing the median log-pitch offset,
    /// so a speaker singing an octave higher is not penalized.
    pub fn offset_semitone_error(&self, threshold: f64) -> f64 {
        let pairs = self.joint_pitch();
        if pairs.is_empty() {
            return 1.0;
        }
        let diffs: Vec<f64> = pairs.iter().map(|&(r, t)| t.log2() - r.log2()).collect();
        let offset = median(&mut diffs.clone());
        rate(diffs.iter().map(|d| (d - offset).abs() * 12.0 > threshold)).unwrap_or(1.0)
    }

    /// Frames with a voicing disagreement or a jointly-voiced gross pitch error.
    pub fn f0_frame_error(&self, relative: f64, absolute_hz: f64) -> f64 {
        rate(self.frames().map(|(i, j)| {
            let (vr, vt) = (self.reference.voiced[i], self.test.voiced[j]);
            if vr != vt {
                return true;
            }
            vr && is_gross_error(
                self.reference.f0_hz[i],
                self.test.f0_hz[j],
                relative,
                absolute_hz,
            )
        }))
        .unwrap_or(1.0)
    }

    /// Pearson correlation of the intensity curves; NaN for a constant curve.
    pub fn intensity_correlation(&self) -> f64 {
        if self.is_empty() {
            return f64::NAN;
        }
        pearson(&self.reference.intensity_db, &self.test.intensity_db)
    }
}

fn energy_from_correlation(r: f64) -> f64 {
    if r.is_nan() {
        return 0.0;
    }
    clamp_unit((r + 1.0) / 2.0)
}

/// The six prosodic similarities; each is `1 - error rate` except energy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ProsodyScores {
    pub gpe: f64,
    pub gpe_log: f64,
    pub gpe_offset: f64,
    pub vde: f64,
    pub ffe: f64,
    pub energy: f64,
}

impl ProsodyScores {
    pub fn from_aligned(aligned: &AlignedProsody, config: &MetricsConfig) -> Self {
        let (rel, abs) = (config.gpe_relative_threshold, config.gpe_absolute_threshold_hz);
        Self {
            gpe: clamp_unit(1.0 - aligned.gross_pitch_error(rel, abs)),
            gpe_log: clamp_unit(1.0 - aligned.semitone_error(config.semitone_threshold)),
            gpe_offset: clamp_unit(1.0 - aligned.offset_semitone_error(config.semitone_threshold)),
            vde: clamp_unit(1.0 - aligned.voicing_decision_error()),
            ffe: clamp_unit(1.0 - aligned.f0_frame_error(rel, abs)),
            energy: energy_from_correlation(aligned.intensity_correlation()),
        }
    }

    pub fn insert_into(&self, sheet: &mut ScoreSheet) {
        sheet.insert(Metric::Gpe, self.gpe);
        sheet.insert(Metric::GpeLog, self.gpe_log);
        sheet.insert(Metric::GpeOffset, self.gpe_offset);
        sheet.insert(Metric::Vde, self.vde);
        sheet.insert(Metric::Ffe, self.ffe);
        sheet.insert(Metric::Energy, self.energy);
    }
}

fn too_short(reference: &ProsodyTrack, test: &ProsodyTrack, config: &MetricsConfig) -> bool {
    if reference.len() < config.min_frames || test.len() < config.min_frames {
        tracing::warn!(
            reference_frames = reference.len(),
            test_frames = test.len(),
            "prosody: track too short to assess"
        );
        return true;
    }
    false
}

/// All prosodic similarities; zeros when either track is too short.
pub fn prosody_scores(
    reference: &ProsodyTrack,
    test: &ProsodyTrack,
    config: &MetricsConfig,
) -> Result<ProsodyScores, ScoringError> {
    if too_short(reference, test, config) {
        return Ok(ProsodyScores::default());
    }
    let aligned = align_tracks(reference, test)?;
    let scores = ProsodyScores::from_aligned(&aligned, config);
    tracing::debug!(?scores, path_len = aligned.len(), "prosody");
    Ok(scores)
}

/// Energy similarity `(r + 1) / 2` alone; `0.0` for too-short or constant tracks.
pub fn energy_similarity(
    reference: &ProsodyTrack,
    test: &ProsodyTrack,
    config: &MetricsConfig,
) -> Result<f64, ScoringError> {
    if too_short(reference, test, config) {
        return Ok(0.0);
    }
    let aligned = align_tracks(reference, test)?;
    Ok(energy_from_correlation(aligned.intensity_correlation()))
}
