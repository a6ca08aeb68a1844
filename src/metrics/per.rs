use crate::alignment::error_rate;

/// Edit distance over phoneme symbols divided by the reference length.
pub fn phoneme_error_rate<S: PartialEq>(reference: &[S], hypothesis: &[S]) -> f64 {
    error_rate(reference, hypothesis)
}

/// `max(0, 1 - PER)`; `0.0` when either side recognized no phonemes.
pub fn per_similarity<S: PartialEq>(reference: &[S], hypothesis: &[S]) -> f64 {
    if reference.is_empty() || hypothesis.is_empty() {
        tracing::debug!(
            reference = reference.len(),
            hypothesis = hypothesis.len(),
            "per: empty phoneme sequence"
        );
        return 0.0;
    }
    (1.0 - phoneme_error_rate(reference, hypothesis)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sequences_score_one() {
        let phones = ["h", "ɛ", "l", "oʊ"];
        assert_eq!(per_similarity(&phones, &phones), 1.0);
    }

    #[test]
    fn single_substitution() {
        let reference = ["w", "ɝ", "l", "d"];
        let hypothesis = ["w", "ɝ", "l", "t"];
        assert_eq!(phoneme_error_rate(&reference, &hypothesis), 0.25);
        assert_eq!(per_similarity(&reference, &hypothesis), 0.75);
    }

    #[test]
    fn empty_inputs_score_zero() {
        let empty: [&str; 0] = [];
        assert_eq!(per_similarity(&empty, &["a"]), 0.0);
        assert_eq!(per_similarity(&["a"], &empty), 0.0);
        assert_eq!(phoneme_error_rate(&empty, &["a"]), 0.0);
    }

    #[test]
    fn heavy_insertion_is_floored_at_zero() {
        assert_eq!(per_similarity(&["a"], &["b", "c", "d"]), 0.0);
    }
}
