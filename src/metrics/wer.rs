use crate::alignment::error_rate;
use crate::error::ScoringError;
use crate::pipeline::traits::Transcriber;
use crate::types::Waveform;

/// Lowercases, strips ASCII punctuation and collapses whitespace.
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word error rate of `hypothesis` against `reference` after normalization.
///
/// `0.0` when the normalized reference has no words.
pub fn word_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let reference = normalize_text(reference);
    let hypothesis = normalize_text(hypothesis);
    let ref_words: Vec<&str> = reference.split(' ').filter(|w| !w.is_empty()).collect();
    let hyp_words: Vec<&str> = hypothesis.split(' ').filter(|w| !w.is_empty()).collect();
    error_rate(&ref_words, &hyp_words)
}

/// WER with both recordings transcribed by the same transcriber.
///
/// When `reference_text` is given it replaces the reference transcription.
pub fn transcribed_wer(
    transcriber: &dyn Transcriber,
    reference: &Waveform,
    test: &Waveform,
    reference_text: Option<&str>,
) -> Result<f64, ScoringError> {
    let hypothesis = transcriber.transcribe(test)?;
    let reference = match reference_text {
        Some(text) => text.to_string(),
        None => transcriber.transcribe(reference)?,
    };
    let wer = word_error_rate(&reference, &hypothesis);
    tracing::debug!(%reference, %hypothesis, wer, "wer");
    Ok(wer)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned;

    impl Transcriber for Canned {
        fn transcribe(&self, waveform: &Waveform) -> Result<String, ScoringError> {
            Ok(if waveform.samples.len() > 2 {
                "The cat sat.".to_string()
            } else {
                "the cat sad".to_string()
            })
        }
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_text("  Hello,   WORLD!\n"), "hello world");
        assert_eq!(normalize_text("it's-fine"), "itsfine");
        assert_eq!(normalize_text("..."), "");
    }

    #[test]
    fn wer_counts_word_edits() {
        assert_eq!(word_error_rate("the cat sat", "the cat sat"), 0.0);
        assert!((word_error_rate("the cat sat", "the bat sat") - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(word_error_rate("a b", "a b c d"), 1.0);
    }

    #[test]
    fn wer_ignores_case_and_punctuation() {
        assert_eq!(word_error_rate("Hello, world!", "hello world"), 0.0);
    }

    #[test]
    fn empty_reference_is_zero() {
        assert_eq!(word_error_rate("", "anything here"), 0.0);
        assert_eq!(word_error_rate("?!", "x"), 0.0);
    }

    #[test]
    fn transcribed_wer_uses_both_recordings() {
        let reference = Waveform::new(vec![0.0; 4], 16_000);
        let test = Waveform::new(vec![0.0; 2], 16_000);
        let wer = transcribed_wer(&Canned, &reference, &test, None).unwrap();
        assert!((wer - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn reference_text_replaces_reference_transcription() {
        let reference = Waveform::new(vec![0.0; 4], 16_000);
        let test = Waveform::new(vec![0.0; 2], 16_000);
        let wer = transcribed_wer(&Canned, &reference, &test, Some("The cat sad")).unwrap();
        assert_eq!(wer, 0.0);
    }
}
