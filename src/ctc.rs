//! Greedy CTC decoding: phoneme spans and character transcripts.

use crate::types::{Posteriorgram, PhonemeSpan};

/// Groups frame-wise arg-max ids into spans of identical non-blank tokens.
///
/// Blank frames are transparent: they neither close nor extend the open span,
/// so `a _ a` is one span covering frames 0..=2 while `a _ b` is two. A span
/// ends on the last frame carrying its token.
pub fn decode_spans(ids: &[usize], blank_id: usize) -> Vec<PhonemeSpan> {
    let mut spans = Vec::new();
    let mut open: Option<PhonemeSpan> = None;

    for (frame, &id) in ids.iter().enumerate() {
        if id == blank_id {
            continue;
        }
        match open.as_mut() {
            Some(span) if span.token_id == id => span.end_frame = frame,
            _ => {
                if let Some(done) = open.take() {
                    spans.push(done);
                }
                open = Some(PhonemeSpan {
                    token_id: id,
                    start_frame: frame,
                    end_frame: frame,
                });
            }
        }
    }
    if let Some(done) = open {
        spans.push(done);
    }
    spans
}

pub fn spans_from_posteriorgram(posteriorgram: &Posteriorgram, blank_id: usize) -> Vec<PhonemeSpan> {
    decode_spans(&posteriorgram.argmax_ids(), blank_id)
}

/// Standard CTC collapse (repeats merge unless a blank separates them).
pub fn collapse_ids(ids: &[usize], blank_id: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut prev: Option<usize> = None;
    for &id in ids {
        if id != blank_id && prev != Some(id) {
            out.push(id);
        }
        prev = Some(id);
    }
    out
}

/// Renders collapsed ids as text; `word_separator` tokens become spaces and
/// angle-bracketed specials (`<s>`, `<unk>`, ...) are dropped.
pub fn greedy_transcript<'a>(
    ids: &[usize],
    blank_id: usize,
    word_separator: &str,
    symbol: impl Fn(usize) -> Option<&'a str>,
) -> String {
    let mut text = String::new();
    for id in collapse_ids(ids, blank_id) {
        let Some(sym) = symbol(id) else { continue };
        if sym == word_separator {
            text.push(' ');
        } else if !(sym.starts_with('<') && sym.ends_with('>')) {
            text.push_str(sym);
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
