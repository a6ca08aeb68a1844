//! Goodness of pronunciation per phoneme span, compared across recordings
//! with a phoneme-aware gapped DTW.

use crate::alignment::{gapped_alignment_cost, Band};
use crate::config::MetricsConfig;
use crate::error::ScoringError;
use crate::metrics::clamp_unit;
use crate::types::{GopEntry, PhonemeSpan, Posteriorgram};

/// One [`GopEntry`] per span: mean over the span's frames of the span token's
/// log-probability minus the best non-blank competitor's.
///
/// Spans outside the posteriorgram are skipped. With no competitor column
/// (a vocabulary of only the token and blank) the GOP is `0.0`.
pub fn gops_from_spans(
    posteriorgram: &Posteriorgram,
    spans: &[PhonemeSpan],
    blank_id: usize,
) -> Vec<GopEntry> {
    let rows = posteriorgram.rows();
    let vocab = posteriorgram.vocab_size();
    let mut out = Vec::with_capacity(spans.len());

    for span in spans {
        if span.start_frame > span.end_frame
            || span.end_frame >= rows.len()
            || span.token_id >= vocab
        {
            continue;
        }
        let segment = &rows[span.start_frame..=span.end_frame];
        let has_competitor = (0..vocab).any(|id| id != span.token_id && id != blank_id);
        let gop = if has_competitor {
            let total: f64 = segment
                .iter()
                .map(|row| {
                    let competitor = row
                        .iter()
                        .enumerate()
                        .filter(|&(id, _)| id != span.token_id && id != blank_id)
                        .map(|(_, &lp)| lp)
                        .fold(f32::NEG_INFINITY, f32::max);
                    f64::from(row[span.token_id]) - f64::from(competitor)
                })
                .sum();
            total / segment.len() as f64
        } else {
            0.0
        };
        out.push(GopEntry {
            token_id: span.token_id,
            gop,
            duration_frames: span.duration_frames(),
        });
    }
    out
}

/// Aligns two GOP sequences and maps the mean path cost to `(0, 1]`.
///
/// Same-token pairs cost `|Δgop| + w·|Δduration|`, different tokens cost the
/// mismatch penalty, and skipping an entry costs the gap penalty. Similarity
/// is `exp(-(cost / (n + m)) / tau)`.
pub fn phoneme_alignment_similarity(
    reference: &[GopEntry],
    test: &[GopEntry],
    config: &MetricsConfig,
) -> f64 {
    if reference.is_empty() || test.is_empty() {
        return 0.0;
    }
    let (n, m) = (reference.len(), test.len());
    let cost = gapped_alignment_cost(
        n,
        m,
        Band::from_width(config.gop_band),
        config.gop_gap_penalty,
        |i, j| {
            let (a, b) = (&reference[i], &test[j]);
            if a.token_id != b.token_id {
                return config.gop_mismatch_penalty;
            }
            let cost = (a.gop - b.gop).abs()
                + config.gop_duration_weight * a.duration_frames.abs_diff(b.duration_frames) as f64;
            if cost.is_finite() {
                cost
            } else {
                config.gop_mismatch_penalty
            }
        },
    );
    let normalized = cost / (n + m) as f64;
    clamp_unit((-normalized / config.gop_tau).exp())
}

fn downsample_spans(spans: &[PhonemeSpan], step: usize) -> Vec<PhonemeSpan> {
    if step <= 1 {
        return spans.to_vec();
    }
    spans
        .iter()
        .map(|s| PhonemeSpan {
            token_id: s.token_id,
            start_frame: s.start_frame / step,
            end_frame: s.end_frame / step,
        })
        .collect()
}

/// GOP similarity between two decoded recordings.
///
/// Returns `0.0` when either posteriorgram has fewer than `config.min_frames`
/// frames or yields no GOP entries.
pub fn gop_similarity(
    reference: (&Posteriorgram, &[PhonemeSpan]),
    test: (&Posteriorgram, &[PhonemeSpan]),
    blank_id: usize,
    config: &MetricsConfig,
) -> Result<f64, ScoringError> {
    let (ref_pg, ref_spans) = reference;
    let (test_pg, test_spans) = test;
    if ref_pg.num_frames() < config.min_frames || test_pg.num_frames() < config.min_frames {
        tracing::warn!(
            reference_frames = ref_pg.num_frames(),
            test_frames = test_pg.num_frames(),
            "gop: posteriorgram too short to assess"
        );
        return Ok(0.0);
    }
    if ref_pg.vocab_size() != test_pg.vocab_size() {
        return Err(ScoringError::invalid_input(format!(
            "posteriorgram vocabularies differ: {} vs {}",
            ref_pg.vocab_size(),
            test_pg.vocab_size()
        )));
    }

    let step = config.gop_downsample;
    let gops_ref = gops_from_spans(
        &ref_pg.downsample(step),
        &downsample_spans(ref_spans, step),
        blank_id,
    );
    let gops_test = gops_from_spans(
        &test_pg.downsample(step),
        &downsample_spans(test_spans, step),
        blank_id,
    );
    let similarity = phoneme_alignment_similarity(&gops_ref, &gops_test, config);
    tracing::debug!(
        reference_phones = gops_ref.len(),
        test_phones = gops_test.len(),
        similarity,
        "gop"
    );
    Ok(similarity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctc::spans_from_posteriorgram;

    fn entry(token_id: usize, gop: f64, duration_frames: usize) -> GopEntry {
        GopEntry {
            token_id,
            gop,
            duration_frames,
        }
    }

    fn peaked(frames: usize, tokens: &[usize]) -> Posteriorgram {
        let rows = (0..frames)
            .map(|t| {
                let mut row = vec![(0.02f32).ln(); 6];
                let token = tokens[(t / 6) % tokens.len()];
                row[token] = (0.9f32).ln();
                row
            })
            .collect();
        Posteriorgram::new(rows).unwrap()
    }

    #[test]
    fn gop_is_margin_over_best_competitor() {
        let row = vec![(0.5f32).ln(), (0.3f32).ln(), (0.15f32).ln(), (0.05f32).ln()];
        let pg = Posteriorgram::new(vec![row.clone(), row]).unwrap();
        let span = PhonemeSpan {
            token_id: 1,
            start_frame: 0,
            end_frame: 1,
        };
        let gops = gops_from_spans(&pg, &[span], 0);
        assert_eq!(gops.len(), 1);
        // blank (id 0) is not a competitor
        assert!((gops[0].gop - (0.3f64 / 0.15).ln()).abs() < 1e-5);
        assert_eq!(gops[0].duration_frames, 2);
    }

    #[test]
    fn out_of_range_spans_are_skipped() {
        let pg = peaked(6, &[1]);
        let spans = [
            PhonemeSpan {
                token_id: 1,
                start_frame: 4,
                end_frame: 9,
            },
            PhonemeSpan {
                token_id: 1,
                start_frame: 0,
                end_frame: 2,
            },
        ];
        assert_eq!(gops_from_spans(&pg, &spans, 0).len(), 1);
    }

    #[test]
    fn no_competitor_gives_zero_gop() {
        let pg = Posteriorgram::new(vec![vec![(0.5f32).ln(), (0.5f32).ln()]]).unwrap();
        let span = PhonemeSpan {
            token_id: 1,
            start_frame: 0,
            end_frame: 0,
        };
        assert_eq!(gops_from_spans(&pg, &[span], 0)[0].gop, 0.0);
    }

    #[test]
    fn identical_gop_sequences_score_one() {
        let seq = [entry(3, 1.2, 10), entry(5, 0.8, 15), entry(3, 2.0, 4)];
        let sim = phoneme_alignment_similarity(&seq, &seq, &MetricsConfig::default());
        assert_eq!(sim, 1.0);
    }

    #[test]
    fn mismatched_tokens_cost_more_than_gop_drift() {
        let config = MetricsConfig::default();
        let reference = [entry(3, 1.2, 10), entry(5, 0.8, 15)];
        let drift = [entry(3, 1.0, 12), entry(5, 0.9, 14)];
        let wrong = [entry(4, 1.2, 10), entry(6, 0.8, 15)];
        let s_drift = phoneme_alignment_similarity(&reference, &drift, &config);
        let s_wrong = phoneme_alignment_similarity(&reference, &wrong, &config);
        assert!(s_drift > s_wrong);
        // one mismatch (1.5) then two gaps (0.5 each) beats two mismatches
        assert!((s_wrong - (-2.5f64 / 4.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn alignment_similarity_is_symmetric() {
        let config = MetricsConfig::default();
        let a = [entry(1, 0.5, 3), entry(2, 1.5, 7), entry(3, 0.2, 2), entry(1, 0.9, 5)];
        let b = [entry(1, 0.4, 4), entry(3, 0.3, 2), entry(1, 1.0, 6)];
        let ab = phoneme_alignment_similarity(&a, &b, &config);
        let ba = phoneme_alignment_similarity(&b, &a, &config);
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn empty_sequences_score_zero() {
        let config = MetricsConfig::default();
        assert_eq!(phoneme_alignment_similarity(&[], &[entry(1, 0.0, 1)], &config), 0.0);
    }

    #[test]
    fn end_to_end_identity() {
        let pg = peaked(90, &[1, 2, 3, 4]);
        let spans = spans_from_posteriorgram(&pg, 0);
        let sim = gop_similarity((&pg, &spans), (&pg, &spans), 0, &MetricsConfig::default()).unwrap();
        assert!((sim - 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_posteriorgram_scores_zero() {
        let short = peaked(4, &[1]);
        let long = peaked(40, &[1, 2]);
        let short_spans = spans_from_posteriorgram(&short, 0);
        let long_spans = spans_from_posteriorgram(&long, 0);
        let sim = gop_similarity(
            (&short, &short_spans),
            (&long, &long_spans),
            0,
            &MetricsConfig::default(),
        )
        .unwrap();
        assert_eq!(sim, 0.0);
    }
}
