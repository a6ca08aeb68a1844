use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Mono PCM samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            samples,
        }
    }

    /// Averages interleaved channels down to mono.
    pub fn from_interleaved(
        interleaved: &[f32],
        channels: usize,
        sample_rate_hz: u32,
    ) -> Result<Self, ScoringError> {
        if channels == 0 {
            return Err(ScoringError::invalid_input("channel count must be positive"));
        }
        if interleaved.len() % channels != 0 {
            return Err(ScoringError::invalid_input(format!(
                "{} interleaved samples do not divide into {channels} channels",
                interleaved.len()
            )));
        }
        let samples = if channels == 1 {
            interleaved.to_vec()
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };
        Ok(Self::new(samples, sample_rate_hz))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate_hz as f64
    }
}

/// Allowed deviation of a frame's probability mass from 1.
const LOG_SOFTMAX_TOLERANCE: f64 = 1e-2;

/// Frame-wise log-softmax output `[T, V]` of the acoustic model.
///
/// Rows must be rectangular and each must exponentiate to a distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Posteriorgram {
    log_probs: Vec<Vec<f32>>,
    vocab_size: usize,
}

impl Posteriorgram {
    pub fn new(log_probs: Vec<Vec<f32>>) -> Result<Self, ScoringError> {
        let vocab_size = log_probs.first().map(Vec::len).unwrap_or(0);
        if let Some((t, row)) = log_probs
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != vocab_size)
        {
            return Err(ScoringError::invalid_input(format!(
                "posteriorgram row {t} has {} columns, expected {vocab_size}",
                row.len()
            )));
        }
        if let Some((t, mass)) = log_probs.iter().enumerate().find_map(|(t, row)| {
            let mass: f64 = row.iter().map(|&lp| f64::from(lp).exp()).sum();
            ((mass - 1.0).abs() > LOG_SOFTMAX_TOLERANCE).then_some((t, mass))
        }) {
            return Err(ScoringError::invalid_input(format!(
                "posteriorgram row {t} is not log-softmax normalized (probability mass {mass:.4})"
            )));
        }
        Ok(Self {
            log_probs,
            vocab_size,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.log_probs.len()
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.log_probs
    }

    /// Arg-max token per frame; the lowest id wins ties.
    pub fn argmax_ids(&self) -> Vec<usize> {
        self.log_probs
            .iter()
            .map(|row| {
                let mut best = 0usize;
                for (id, &lp) in row.iter().enumerate() {
                    if lp > row[best] {
                        best = id;
                    }
                }
                best
            })
            .collect()
    }

    /// Keeps every `step`-th frame starting at frame 0.
    pub fn downsample(&self, step: usize) -> Self {
        if step <= 1 {
            return self.clone();
        }
        Self {
            log_probs: self.log_probs.iter().step_by(step).cloned().collect(),
            vocab_size: self.vocab_size,
        }
    }

    /// Probabilities with the blank column removed and each frame renormalized.
    ///
    /// A frame whose non-blank mass underflows becomes uniform over the
    /// remaining tokens.
    pub fn probabilities_without(&self, blank_id: usize) -> Vec<Vec<f64>> {
        let keep = |id: usize| id != blank_id;
        let width = (0..self.vocab_size).filter(|&id| keep(id)).count();
        self.log_probs
            .iter()
            .map(|row| {
                let mut probs: Vec<f64> = row
                    .iter()
                    .enumerate()
                    .filter(|&(id, _)| keep(id))
                    .map(|(_, &lp)| (lp as f64).exp())
                    .collect();
                let mass: f64 = probs.iter().sum();
                if mass > 1e-12 && mass.is_finite() {
                    probs.iter_mut().for_each(|p| *p /= mass);
                } else if width > 0 {
                    probs.iter_mut().for_each(|p| *p = 1.0 / width as f64);
                }
                probs
            })
            .collect()
    }
}

/// A run of identical non-blank arg-max tokens; frame bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhonemeSpan {
    pub token_id: usize,
    pub start_frame: usize,
    pub end_frame: usize,
}

impl PhonemeSpan {
    pub fn duration_frames(&self) -> usize {
        self.end_frame + 1 - self.start_frame
    }
}

/// Goodness of pronunciation summary of one phoneme span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GopEntry {
    pub token_id: usize,
    pub gop: f64,
    pub duration_frames: usize,
}

/// Frame-rate pitch, intensity and voicing streams of one recording.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProsodyTrack {
    pub f0_hz: Vec<f64>,
    pub intensity_db: Vec<f64>,
    pub voiced: Vec<bool>,
}

impl ProsodyTrack {
    pub fn len(&self) -> usize {
        self.f0_hz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.f0_hz.is_empty()
    }

    pub(crate) fn check_lengths(&self) -> Result<(), ScoringError> {
        if self.intensity_db.len() != self.f0_hz.len() || self.voiced.len() != self.f0_hz.len() {
            return Err(ScoringError::invalid_input(format!(
                "prosody streams differ in length: f0={}, intensity={}, voiced={}",
                self.f0_hz.len(),
                self.intensity_db.len(),
                self.voiced.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "PER")]
    Per,
    #[serde(rename = "PPG")]
    Ppg,
    #[serde(rename = "GOP")]
    Gop,
    #[serde(rename = "WER")]
    Wer,
    #[serde(rename = "GPE")]
    Gpe,
    #[serde(rename = "GPE_log")]
    GpeLog,
    #[serde(rename = "GPE_offset")]
    GpeOffset,
    #[serde(rename = "VDE")]
    Vde,
    #[serde(rename = "FFE")]
    Ffe,
    #[serde(rename = "Energy")]
    Energy,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::Per,
        Metric::Ppg,
        Metric::Gop,
        Metric::Wer,
        Metric::Gpe,
        Metric::GpeLog,
        Metric::GpeOffset,
        Metric::Vde,
        Metric::Ffe,
        Metric::Energy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Per => "PER",
            Self::Ppg => "PPG",
            Self::Gop => "GOP",
            Self::Wer => "WER",
            Self::Gpe => "GPE",
            Self::GpeLog => "GPE_log",
            Self::GpeOffset => "GPE_offset",
            Self::Vde => "VDE",
            Self::Ffe => "FFE",
            Self::Energy => "Energy",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }

    /// WER is an error rate; every other metric is a similarity in `[0, 1]`.
    pub fn higher_is_better(self) -> bool {
        self != Self::Wer
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metric name to value. A metric that could not be computed is absent, not zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreSheet(BTreeMap<Metric, f64>);

impl ScoreSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: Metric, value: f64) {
        self.0.insert(metric, value);
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.0.contains_key(&metric)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.0.iter().map(|(&m, &v)| (m, v))
    }

    pub fn missing(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| !self.contains(*m))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_distance(distance_to_int: f64) -> Self {
        if distance_to_int < 0.3 {
            Self::High
        } else if distance_to_int < 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingPrediction {
    /// Clamped to `[1, 5]`.
    pub score: f64,
    pub score_int: u8,
    pub score_half: f64,
    pub confidence: Confidence,
}
