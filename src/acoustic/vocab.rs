use std::collections::HashMap;
use std::path::Path;

use crate::error::ScoringError;
use crate::types::PhonemeSpan;

const PAD_TOKEN: &str = "<pad>";
const WORD_SEPARATOR: &str = "|";
/// Ids at or above this mark a corrupt vocabulary rather than a real CTC head.
const MAX_VOCAB_SLOTS: usize = 1 << 20;

/// Token inventory of a CTC checkpoint (`vocab.json`), including multi-character
/// phoneme symbols such as `oʊ`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhonemeVocab {
    symbols: Vec<Option<String>>,
    ids: HashMap<String, usize>,
    blank_id: usize,
}

impl PhonemeVocab {
    /// Blank is `pad_token_id` when given, otherwise the `<pad>` entry.
    pub fn from_map(
        ids: HashMap<String, usize>,
        pad_token_id: Option<usize>,
    ) -> Result<Self, ScoringError> {
        let blank_id = pad_token_id
            .or_else(|| ids.get(PAD_TOKEN).copied())
            .ok_or_else(|| {
                ScoringError::config("cannot determine blank token: no pad_token_id and no <pad> entry")
            })?;
        let max_id = ids
            .values()
            .copied()
            .max()
            .ok_or_else(|| ScoringError::config("vocabulary is empty"))?;
        if max_id >= MAX_VOCAB_SLOTS {
            return Err(ScoringError::config(format!(
                "vocabulary id {max_id} exceeds the {MAX_VOCAB_SLOTS}-slot limit"
            )));
        }
        if blank_id > max_id {
            return Err(ScoringError::config(format!(
                "blank id {blank_id} is outside the vocabulary (highest id {max_id})"
            )));
        }
        let mut symbols = vec![None; max_id + 1];
        for (symbol, &id) in &ids {
            symbols[id] = Some(symbol.clone());
        }
        Ok(Self {
            symbols,
            ids,
            blank_id,
        })
    }

    pub fn load(path: &Path, pad_token_id: Option<usize>) -> Result<Self, ScoringError> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ScoringError::config(format!("cannot read vocabulary {}: {e}", path.display()))
        })?;
        let ids: HashMap<String, usize> =
            serde_json::from_str(&data).map_err(|e| ScoringError::json("parse vocab.json", e))?;
        Self::from_map(ids, pad_token_id)
    }

    pub fn blank_id(&self) -> usize {
        self.blank_id
    }

    /// Number of id slots (highest id + 1).
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).and_then(|s| s.as_deref())
    }

    pub fn id(&self, symbol: &str) -> Option<usize> {
        self.ids.get(symbol).copied()
    }

    pub fn word_separator(&self) -> &'static str {
        WORD_SEPARATOR
    }

    /// Symbols of `spans` in order; unknown ids map to an empty string.
    pub fn phonemes(&self, spans: &[PhonemeSpan]) -> Vec<String> {
        spans
            .iter()
            .map(|s| self.symbol(s.token_id).unwrap_or_default().to_string())
            .collect()
    }
}
