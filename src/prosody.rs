//! Built-in pitch, intensity and voicing tracker.
//!
//! Short-time autocorrelation on Hann-windowed frames, normalized by the
//! window's own autocorrelation, with a small octave cost favoring higher
//! candidates.

use crate::error::ScoringError;
use crate::pipeline::traits::ProsodyExtractor;
use crate::types::{ProsodyTrack, Waveform};

/// 20 µPa, the reference for dB SPL with samples read as pascals.
const REFERENCE_PRESSURE: f64 = 2e-5;
const PERIODS_PER_WINDOW: f64 = 3.0;

#[derive(Debug, Clone, PartialEq)]
pub struct AutocorrelationPitchTracker {
    pub time_step_secs: f64,
    pub pitch_floor_hz: f64,
    pub pitch_ceiling_hz: f64,
    /// Minimum normalized autocorrelation of a voiced candidate.
    pub voicing_threshold: f64,
    pub octave_cost: f64,
    /// Frames at or below this intensity are unvoiced.
    pub silence_threshold_db: f64,
}

impl Default for AutocorrelationPitchTracker {
    fn default() -> Self {
        Self {
            time_step_secs: 0.010,
            pitch_floor_hz: 75.0,
            pitch_ceiling_hz: 600.0,
            voicing_threshold: 0.45,
            octave_cost: 0.01,
            silence_threshold_db: 30.0,
        }
    }
}

fn hann_window(n: usize) -> Vec<f64> {
    if n <= 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// `r[lag] = Σ x[i] x[i + lag]` for `lag < lags`.
fn autocorrelation(samples: &[f64], lags: usize) -> Vec<f64> {
    let n = samples.len();
    (0..lags)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            samples[..n - lag]
                .iter()
                .zip(&samples[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}

fn intensity_db(mean_square: f64) -> f64 {
    let ratio = mean_square / (REFERENCE_PRESSURE * REFERENCE_PRESSURE);
    if ratio <= 1.0 {
        0.0
    } else {
        10.0 * ratio.log10()
    }
}

impl AutocorrelationPitchTracker {
    fn validate(&self, sample_rate_hz: u32) -> Result<(), ScoringError> {
        if sample_rate_hz == 0 {
            return Err(ScoringError::invalid_input("sample rate must be positive"));
        }
        if self.time_step_secs <= 0.0
            || self.pitch_floor_hz <= 0.0
            || self.pitch_ceiling_hz <= self.pitch_floor_hz
        {
            return Err(ScoringError::config(format!(
                "invalid pitch tracker settings: step {}s, range {}..{} Hz",
                self.time_step_secs, self.pitch_floor_hz, self.pitch_ceiling_hz
            )));
        }
        if f64::from(sample_rate_hz) < 2.0 * self.pitch_ceiling_hz {
            return Err(ScoringError::invalid_input(format!(
                "{sample_rate_hz} Hz audio cannot resolve a {} Hz pitch ceiling",
                self.pitch_ceiling_hz
            )));
        }
        Ok(())
    }

    /// Analyzes `waveform` into one frame per time step.
    ///
    /// Audio shorter than one analysis window yields an empty track.
    pub fn analyze(&self, waveform: &Waveform) -> Result<ProsodyTrack, ScoringError> {
        self.validate(waveform.sample_rate_hz)?;
        let sr = f64::from(waveform.sample_rate_hz);
        let window_len = (PERIODS_PER_WINDOW / self.pitch_floor_hz * sr).round() as usize;
        let hop = ((self.time_step_secs * sr).round() as usize).max(1);
        let min_lag = ((sr / self.pitch_ceiling_hz).floor() as usize).max(2);
        let max_lag = ((sr / self.pitch_floor_hz).ceil() as usize).min(window_len - 2);

        let samples: Vec<f64> = waveform.samples.iter().map(|&s| f64::from(s)).collect();
        if samples.len() < window_len {
            return Ok(ProsodyTrack::default());
        }

        let window = hann_window(window_len);
        let window_ac = autocorrelation(&window, max_lag + 2);
        let num_frames = 1 + (samples.len() - window_len) / hop;
        let mut track = ProsodyTrack {
            f0_hz: Vec::with_capacity(num_frames),
            intensity_db: Vec::with_capacity(num_frames),
            voiced: Vec::with_capacity(num_frames),
        };
        let mut frame = vec![0.0; window_len];

        for k in 0..num_frames {
            let segment = &samples[k * hop..k * hop + window_len];
            let mean = segment.iter().sum::<f64>() / window_len as f64;
            let mean_square =
                segment.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / window_len as f64;
            let intensity = intensity_db(mean_square);
            for ((dst, &x), &w) in frame.iter_mut().zip(segment).zip(&window) {
                *dst = (x - mean) * w;
            }
            let f0 = self.frame_pitch(&frame, &window_ac, min_lag, max_lag, sr);
            track.f0_hz.push(f0);
            track.intensity_db.push(intensity);
            track.voiced.push(f0 > 0.0 && intensity > self.silence_threshold_db);
        }

        tracing::debug!(
            frames = num_frames,
            voiced = track.voiced.iter().filter(|v| **v).count(),
            "prosody: analyzed track"
        );
        Ok(track)
    }

    /// Best pitch candidate of one windowed frame, or `0.0` when unvoiced.
    fn frame_pitch(
        &self,
        frame: &[f64],
        window_ac: &[f64],
        min_lag: usize,
        max_lag: usize,
        sr: f64,
    ) -> f64 {
        let r = autocorrelation(frame, max_lag + 2);
        if r[0] <= f64::EPSILON || window_ac[0] <= 0.0 {
            return 0.0;
        }
        let norm = |lag: usize| {
            if window_ac[lag] <= 0.0 {
                0.0
            } else {
                (r[lag] / r[0]) / (window_ac[lag] / window_ac[0])
            }
        };

        let mut best: Option<(f64, f64)> = None;
        for lag in min_lag..=max_lag {
            let (prev, curr, next) = (norm(lag - 1), norm(lag), norm(lag + 1));
            if curr < self.voicing_threshold || curr <= prev || curr < next {
                continue;
            }
            let denom = prev - 2.0 * curr + next;
            let refined = if denom.abs() > 1e-10 {
                let delta = 0.5 * (prev - next) / denom;
                if delta.abs() < 1.0 {
                    lag as f64 + delta
                } else {
                    lag as f64
                }
            } else {
                lag as f64
            };
            let freq = sr / refined;
            let strength = curr - self.octave_cost * (self.pitch_floor_hz / freq).log2();
            if best.map_or(true, |(_, s)| strength > s) {
                best = Some((freq, strength));
            }
        }

        match best {
            Some((freq, _)) if (self.pitch_floor_hz..=self.pitch_ceiling_hz).contains(&freq) => freq,
            _ => 0.0,
        }
    }
}

impl ProsodyExtractor for AutocorrelationPitchTracker {
    fn extract(&self, waveform: &Waveform) -> Result<ProsodyTrack, ScoringError> {
        self.analyze(waveform)
    }
}
