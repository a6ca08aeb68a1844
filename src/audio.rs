use std::path::Path;

use claxon::FlacReader;
use ebur128::{EbuR128, Mode};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::config::AudioConfig;
use crate::error::ScoringError;
use crate::types::Waveform;

/// Decodes a WAV or FLAC file to mono. Other containers must be transcoded upstream.
pub fn load_waveform(path: impl AsRef<Path>) -> Result<Waveform, ScoringError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ScoringError::invalid_input(format!(
            "audio file not found: {}",
            path.display()
        )));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "wav" | "wave" => read_wav(path),
        "flac" => read_flac(path),
        other => Err(ScoringError::invalid_input(format!(
            "unsupported audio container '{other}' for {}; transcode to wav or flac first",
            path.display()
        ))),
    }
}

fn read_wav(path: &Path) -> Result<Waveform, ScoringError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| ScoringError::audio("open wav", e))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample as u32);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| ScoringError::audio("decode wav samples", e))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| ScoringError::audio("decode wav samples", e))?,
    };
    Waveform::from_interleaved(&interleaved, spec.channels as usize, spec.sample_rate)
}

fn read_flac(path: &Path) -> Result<Waveform, ScoringError> {
    let mut reader = FlacReader::open(path).map_err(|e| ScoringError::audio("open flac", e))?;
    let info = reader.streaminfo();
    let scale = int_scale(info.bits_per_sample);
    let interleaved: Vec<f32> = reader
        .samples()
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<Result<_, _>>()
        .map_err(|e| ScoringError::audio("decode flac samples", e))?;
    Waveform::from_interleaved(&interleaved, info.channels as usize, info.sample_rate)
}

fn int_scale(bits_per_sample: u32) -> f32 {
    if bits_per_sample > 1 {
        ((1_i64 << (bits_per_sample - 1)) - 1) as f32
    } else {
        1.0
    }
}

/// Band-limited sinc resampling to `target_rate_hz`.
pub fn resample(waveform: &Waveform, target_rate_hz: u32) -> Result<Waveform, ScoringError> {
    if waveform.sample_rate_hz == 0 || target_rate_hz == 0 {
        return Err(ScoringError::invalid_input("sample rate must be positive"));
    }
    if waveform.sample_rate_hz == target_rate_hz || waveform.is_empty() {
        return Ok(Waveform::new(waveform.samples.clone(), target_rate_hz));
    }

    let ratio = target_rate_hz as f64 / waveform.sample_rate_hz as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, waveform.samples.len(), 1)
        .map_err(|e| ScoringError::runtime("build resampler", e))?;

    let delay = resampler.output_delay();
    let mut out = resampler
        .process(&[waveform.samples.as_slice()], None)
        .map_err(|e| ScoringError::runtime("resample", e))?
        .pop()
        .unwrap_or_default();
    let tail = resampler
        .process_partial(None::<&[&[f32]]>, None)
        .map_err(|e| ScoringError::runtime("flush resampler", e))?
        .pop()
        .unwrap_or_default();
    out.extend(tail);

    let expected = (waveform.samples.len() as f64 * ratio).round() as usize;
    let samples: Vec<f32> = out.into_iter().skip(delay).take(expected).collect();
    tracing::debug!(
        from_hz = waveform.sample_rate_hz,
        to_hz = target_rate_hz,
        samples_in = waveform.samples.len(),
        samples_out = samples.len(),
        "resampled waveform"
    );
    Ok(Waveform::new(samples, target_rate_hz))
}

/// Scales so the absolute peak sits at `target_peak_dbfs`, with gain capped at `max_gain`.
pub fn peak_normalize(samples: &[f32], target_peak_dbfs: f32, max_gain: f32) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |m, &x| m.max(x.abs())) + 1e-9;
    let target_amp = 10f32.powf(target_peak_dbfs / 20.0);
    let gain = (target_amp / peak).min(max_gain);
    samples.iter().map(|&x| x * gain).collect()
}

/// Integrated EBU R128 loudness in LUFS; `None` when no block passes the
/// gates (audio shorter than 400 ms, or silence).
pub fn integrated_loudness(
    samples: &[f32],
    sample_rate_hz: u32,
) -> Result<Option<f64>, ScoringError> {
    let mut meter = EbuR128::new(1, sample_rate_hz, Mode::I)
        .map_err(|e| ScoringError::audio("create loudness meter", e))?;
    meter
        .add_frames_f32(samples)
        .map_err(|e| ScoringError::audio("measure loudness", e))?;
    let lufs = meter
        .loudness_global()
        .map_err(|e| ScoringError::audio("measure loudness", e))?;
    Ok(lufs.is_finite().then_some(lufs))
}

/// Gains the signal to `target_lufs`, then scales it down if its peak would
/// exceed `ceiling`. Ungated audio is returned unchanged.
pub fn loudness_normalize(
    samples: &[f32],
    sample_rate_hz: u32,
    target_lufs: f64,
    ceiling: f32,
) -> Result<Vec<f32>, ScoringError> {
    let Some(loudness) = integrated_loudness(samples, sample_rate_hz)? else {
        tracing::debug!(samples = samples.len(), "loudness: nothing gated, gain left unchanged");
        return Ok(samples.to_vec());
    };
    let gain = 10f64.powf((target_lufs - loudness) / 20.0) as f32;
    let mut out: Vec<f32> = samples.iter().map(|&x| x * gain).collect();
    let peak = out.iter().fold(0.0f32, |m, &x| m.max(x.abs()));
    if peak > ceiling {
        let scale = ceiling / peak;
        out.iter_mut().for_each(|x| *x *= scale);
    }
    tracing::debug!(loudness, target_lufs, gain, "loudness normalized");
    Ok(out)
}

/// Peak then loudness normalization, as configured, at the waveform's own rate.
pub fn preprocess(waveform: &Waveform, config: &AudioConfig) -> Result<Waveform, ScoringError> {
    if waveform.is_empty() {
        return Ok(waveform.clone());
    }
    let mut samples = if config.peak_normalize {
        peak_normalize(&waveform.samples, config.target_peak_dbfs, config.max_gain)
    } else {
        waveform.samples.clone()
    };
    if config.loudness_normalize {
        samples = loudness_normalize(
            &samples,
            waveform.sample_rate_hz,
            config.target_lufs,
            config.clip_ceiling,
        )?;
    }
    Ok(Waveform::new(samples, waveform.sample_rate_hz))
}

/// Zero-mean, unit-variance scaling expected by wav2vec2 feature extractors.
pub(crate) fn normalize_zero_mean_unit_var(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&x| {
            let d = x as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = (var + 1e-7).sqrt();
    samples
        .iter()
        .map(|&x| ((x as f64 - mean) / std) as f32)
        .collect()
}
