pub mod dtw;
pub mod levenshtein;

pub use dtw::{
    dtw, dtw_sequences, gapped_alignment_cost, Band, CostMatrix, DtwAlignment, INFINITE_COST,
};
pub use levenshtein::{edit_distance, error_rate};
