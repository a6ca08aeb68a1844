use std::collections::HashMap;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use pronunciation_scorer::alignment::{dtw_sequences, Band};
use pronunciation_scorer::ctc::spans_from_posteriorgram;
use pronunciation_scorer::metrics::{
    energy_similarity, gop_similarity, per_similarity, phoneme_error_rate, ppg_similarity,
    prosody_scores,
};
use pronunciation_scorer::{
    MetricsConfig, PpgDistance, Posteriorgram, ProsodyTrack, RatingFeatures, RatingModelKind,
    RatingPredictor, StandardScaler,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BLANK: usize = 0;
const VOCAB: usize = 6;
const PHONES: [&str; 8] = ["a", "e", "i", "o", "u", "k", "s", "t"];

fn random_posteriorgram(rng: &mut StdRng, frames: std::ops::Range<usize>) -> Posteriorgram {
    let frames = rng.gen_range(frames);
    let rows = (0..frames)
        .map(|_| {
            let logits: Vec<f32> = (0..VOCAB).map(|_| rng.gen_range(-4.0f32..4.0)).collect();
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let log_sum = logits.iter().map(|l| (l - max).exp()).sum::<f32>().ln() + max;
            logits.iter().map(|l| l - log_sum).collect()
        })
        .collect();
    Posteriorgram::new(rows).unwrap()
}

fn random_phones(rng: &mut StdRng, len: usize) -> Vec<&'static str> {
    (0..len)
        .map(|_| PHONES[rng.gen_range(0..PHONES.len())])
        .collect()
}

/// Lengths may fall below `min_frames`; f0 is zero on unvoiced frames.
fn random_track(rng: &mut StdRng, frames: std::ops::Range<usize>) -> ProsodyTrack {
    let frames = rng.gen_range(frames);
    let voiced: Vec<bool> = (0..frames).map(|_| rng.gen_bool(0.6)).collect();
    let f0_hz = voiced
        .iter()
        .map(|&v| if v { rng.gen_range(0.0..=600.0) } else { 0.0 })
        .collect();
    let intensity_db = (0..frames).map(|_| rng.gen_range(0.0..=100.0)).collect();
    ProsodyTrack {
        f0_hz,
        intensity_db,
        voiced,
    }
}

fn in_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

#[test]
fn similarities_stay_in_unit_interval() {
    let mut rng = StdRng::seed_from_u64(7);
    let jsd = MetricsConfig::default();
    let cosine = MetricsConfig {
        ppg_distance: PpgDistance::Cosine,
        ..MetricsConfig::default()
    };
    for _ in 0..1000 {
        let a = random_posteriorgram(&mut rng, 1..60);
        let b = random_posteriorgram(&mut rng, 1..60);
        let spans_a = spans_from_posteriorgram(&a, BLANK);
        let spans_b = spans_from_posteriorgram(&b, BLANK);

        let ppg = ppg_similarity(&a, &b, BLANK, &jsd).unwrap();
        assert!(in_unit(ppg), "ppg = {ppg}");
        let ppg_cos = ppg_similarity(&a, &b, BLANK, &cosine).unwrap();
        assert!(in_unit(ppg_cos), "ppg (cosine) = {ppg_cos}");
        let gop = gop_similarity((&a, &spans_a), (&b, &spans_b), BLANK, &jsd).unwrap();
        assert!(in_unit(gop), "gop = {gop}");

        let (ref_len, test_len) = (rng.gen_range(0..20), rng.gen_range(0..20));
        let ref_phones = random_phones(&mut rng, ref_len);
        let test_phones = random_phones(&mut rng, test_len);
        let per = per_similarity(&ref_phones, &test_phones);
        assert!(in_unit(per), "per similarity = {per}");
        if !ref_phones.is_empty() {
            assert!(phoneme_error_rate(&ref_phones, &test_phones) >= 0.0);
        }

        let reference = random_track(&mut rng, 0..60);
        let test = random_track(&mut rng, 0..60);
        let scores = prosody_scores(&reference, &test, &jsd).unwrap();
        for (name, value) in [
            ("gpe", scores.gpe),
            ("gpe_log", scores.gpe_log),
            ("gpe_offset", scores.gpe_offset),
            ("vde", scores.vde),
            ("ffe", scores.ffe),
            ("energy", scores.energy),
        ] {
            assert!(
                in_unit(value),
                "{name} = {value} ({} vs {} frames)",
                reference.len(),
                test.len()
            );
        }
        let energy = energy_similarity(&reference, &test, &jsd).unwrap();
        assert!(in_unit(energy), "energy similarity = {energy}");
    }
}

#[test]
fn frame_metrics_are_symmetric() {
    let mut rng = StdRng::seed_from_u64(11);
    let config = MetricsConfig::default();
    for _ in 0..200 {
        let a = random_posteriorgram(&mut rng, 5..80);
        let b = random_posteriorgram(&mut rng, 5..80);
        let spans_a = spans_from_posteriorgram(&a, BLANK);
        let spans_b = spans_from_posteriorgram(&b, BLANK);

        let ab = ppg_similarity(&a, &b, BLANK, &config).unwrap();
        let ba = ppg_similarity(&b, &a, BLANK, &config).unwrap();
        assert!((ab - ba).abs() < 1e-9, "ppg {ab} vs {ba}");

        let ab = gop_similarity((&a, &spans_a), (&b, &spans_b), BLANK, &config).unwrap();
        let ba = gop_similarity((&b, &spans_b), (&a, &spans_a), BLANK, &config).unwrap();
        assert!((ab - ba).abs() < 1e-9, "gop {ab} vs {ba}");
    }
}

#[test]
fn identical_recordings_score_one() {
    let mut rng = StdRng::seed_from_u64(13);
    let config = MetricsConfig::default();
    for _ in 0..200 {
        let a = random_posteriorgram(&mut rng, 5..80);
        let spans = spans_from_posteriorgram(&a, BLANK);

        let ppg = ppg_similarity(&a, &a, BLANK, &config).unwrap();
        assert!((ppg - 1.0).abs() < 1e-9, "ppg = {ppg}");

        let gop = gop_similarity((&a, &spans), (&a, &spans), BLANK, &config).unwrap();
        if spans.is_empty() {
            assert_eq!(gop, 0.0);
        } else {
            assert!((gop - 1.0).abs() < 1e-9, "gop = {gop}");
        }

        let len = rng.gen_range(1..30);
        let phones = random_phones(&mut rng, len);
        assert_eq!(per_similarity(&phones, &phones), 1.0);
    }
}

#[test]
fn single_substitution_costs_one_over_length() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..500 {
        let n = rng.gen_range(1..40);
        let reference = random_phones(&mut rng, n);
        let mut hypothesis = reference.clone();
        hypothesis[rng.gen_range(0..n)] = "zh";
        let per = phoneme_error_rate(&reference, &hypothesis);
        assert!((per - 1.0 / n as f64).abs() < 1e-12, "n = {n}, per = {per}");
    }
}

#[test]
fn per_grows_with_substitutions() {
    let mut rng = StdRng::seed_from_u64(19);
    for _ in 0..200 {
        let n = rng.gen_range(2..30);
        let reference = random_phones(&mut rng, n);
        let mut hypothesis = reference.clone();
        let mut previous = phoneme_error_rate(&reference, &hypothesis);
        assert_eq!(previous, 0.0);
        for k in 0..n {
            // Out-of-alphabet symbols can only be matched by editing them.
            hypothesis[k] = "zh";
            let per = phoneme_error_rate(&reference, &hypothesis);
            assert!(per >= previous, "substitution {k}: {per} < {previous}");
            assert!((per - (k + 1) as f64 / n as f64).abs() < 1e-12);
            previous = per;
        }
    }
}

#[test]
fn band_widens_for_length_mismatch() {
    let mut rng = StdRng::seed_from_u64(23);
    for _ in 0..100 {
        let n = rng.gen_range(10..120);
        let m = (n as f64 * rng.gen_range(1.3..2.5)).ceil() as usize;
        let (a, b) = if rng.gen_bool(0.5) { (n, m) } else { (m, n) };
        let xs: Vec<f64> = (0..a).map(|_| rng.gen_range(0.0..1.0)).collect();
        let ys: Vec<f64> = (0..b).map(|_| rng.gen_range(0.0..1.0)).collect();
        let required = (1.5 * a.abs_diff(b) as f64).ceil() as usize + 50;

        for band in [Band::Auto, Band::Fixed(2)] {
            let alignment = dtw_sequences(&xs, &ys, band, |x, y| (x - y).abs()).unwrap();
            let width = alignment.band_width.unwrap();
            assert!(width >= required, "{band:?}: width {width} < {required}");
            assert!(alignment.total_cost.is_finite());
            assert_eq!(alignment.path.last(), Some(&(a - 1, b - 1)));
            for i in 0..a {
                for j in 0..b {
                    if i.abs_diff(j) <= required {
                        assert!(alignment.was_computed(i, j), "({i}, {j}) outside band");
                    }
                }
            }
        }
    }
}

#[test]
fn global_band_is_unrestricted() {
    let xs = [0.0, 1.0, 2.0];
    let ys = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5];
    let alignment = dtw_sequences(&xs, &ys, Band::Global, |x: &f64, y: &f64| (x - y).abs()).unwrap();
    assert_eq!(alignment.band_width, None);
    assert!(alignment.was_computed(0, 7));
}

/// `3 -> 1 -> 1` rating model: `out_weight * relu(sum(features)) + out_bias`.
fn summing_predictor(out_weight: f32, out_bias: f32) -> RatingPredictor {
    let device = Device::Cpu;
    let tensors = HashMap::from([
        (
            "fc1.weight".to_string(),
            Tensor::new(&[[1.0f32, 1.0, 1.0]], &device).unwrap(),
        ),
        ("fc1.bias".to_string(), Tensor::new(&[0.0f32], &device).unwrap()),
        (
            "fc2.weight".to_string(),
            Tensor::new(&[[out_weight]], &device).unwrap(),
        ),
        ("fc2.bias".to_string(), Tensor::new(&[out_bias], &device).unwrap()),
    ]);
    let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
    RatingPredictor::from_var_builder(
        &RatingModelKind::Tiny { hidden_dim: 1 },
        StandardScaler::identity(3),
        vb,
    )
    .unwrap()
}

#[test]
fn ratings_are_clamped_to_star_range() {
    let high = summing_predictor(100.0, 0.0);
    let low = summing_predictor(-100.0, 0.0);
    let features = RatingFeatures::new(0.9, 0.8, 0.7);
    let top = high.predict(&features).unwrap();
    assert_eq!(top.score, 5.0);
    assert_eq!(top.score_int, 5);
    let bottom = low.predict(&features).unwrap();
    assert_eq!(bottom.score, 1.0);
    assert_eq!(bottom.score_int, 1);

    let mut rng = StdRng::seed_from_u64(29);
    for _ in 0..300 {
        let predictor = summing_predictor(rng.gen_range(-5.0..5.0), rng.gen_range(-3.0..8.0));
        let features = RatingFeatures::new(
            rng.gen_range(0.0..=1.0),
            rng.gen_range(0.0..=1.0),
            rng.gen_range(0.0..=1.0),
        );
        let rating = predictor.predict(&features).unwrap();
        assert!((1.0..=5.0).contains(&rating.score), "score = {}", rating.score);
        assert!((1..=5).contains(&rating.score_int));
        assert_eq!((rating.score_half * 2.0).fract(), 0.0);
        assert!((rating.score_half - rating.score).abs() <= 0.25 + 1e-9);
    }
}
