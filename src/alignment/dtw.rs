//! Dynamic time warping over dense cost matrices.
//!
//! Cells outside the active band hold [`INFINITE_COST`] and are never chosen
//! while a finite in-band predecessor exists.

use crate::error::ScoringError;

pub const INFINITE_COST: f64 = f64::INFINITY;

/// Sequences whose length ratio exceeds this get a widened band.
const BAND_WIDEN_RATIO: f64 = 1.2;
const BAND_WIDEN_FACTOR: f64 = 1.5;
const BAND_WIDEN_MARGIN: usize = 50;

/// Row-major `rows x cols` matrix of pairwise costs.
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl CostMatrix {
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Evaluates `cost(i, j)` only inside `width`; other cells stay infinite.
    pub fn from_fn(
        rows: usize,
        cols: usize,
        width: Option<usize>,
        mut cost: impl FnMut(usize, usize) -> f64,
    ) -> Self {
        let mut matrix = Self::filled(rows, cols, INFINITE_COST);
        for i in 0..rows {
            if let Some((lo, hi)) = band_range(i, cols, width) {
                for j in lo..=hi {
                    matrix.data[i * cols + j] = cost(i, j);
                }
            }
        }
        matrix
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }
}

/// Which `(i, j)` cells an alignment may visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Band {
    /// Every cell.
    Global,
    /// Sakoe-Chiba band of `max(|n-m|, max(n,m)/10)`.
    #[default]
    Auto,
    /// Sakoe-Chiba band of the given half-width.
    Fixed(usize),
}

impl Band {
    pub fn from_width(width: Option<usize>) -> Self {
        width.map_or(Self::Global, Self::Fixed)
    }

    /// Half-width actually used for `n x m`, or `None` when unrestricted.
    ///
    /// Never narrower than `|n-m|`, so `(n-1, m-1)` stays reachable; when one
    /// sequence is more than 1.2x the other, at least `1.5 |n-m| + 50`.
    pub fn effective_width(self, n: usize, m: usize) -> Option<usize> {
        let diff = n.abs_diff(m);
        let requested = match self {
            Self::Global => return None,
            Self::Auto => diff.max(n.max(m) / 10),
            Self::Fixed(w) => w,
        };
        let (short, long) = (n.min(m), n.max(m));
        let mut width = requested.max(diff);
        if long as f64 > BAND_WIDEN_RATIO * short as f64 {
            let widened = (diff as f64 * BAND_WIDEN_FACTOR).ceil() as usize + BAND_WIDEN_MARGIN;
            if widened > width {
                tracing::debug!(n, m, requested, widened, "dtw: widening band for length mismatch");
                width = widened;
            }
        }
        Some(width)
    }
}

/// Inclusive column range of row `i` under `|i - j| <= width`.
fn band_range(i: usize, cols: usize, width: Option<usize>) -> Option<(usize, usize)> {
    if cols == 0 {
        return None;
    }
    match width {
        None => Some((0, cols - 1)),
        Some(w) => {
            let lo = i.saturating_sub(w);
            let hi = (i + w).min(cols - 1);
            (lo <= hi).then_some((lo, hi))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DtwAlignment {
    pub total_cost: f64,
    /// `total_cost / (n + m)`.
    pub normalized_cost: f64,
    /// Monotonic `(i, j)` pairs from `(0, 0)` to `(n-1, m-1)`.
    pub path: Vec<(usize, usize)>,
    pub accumulated: CostMatrix,
    pub band_width: Option<usize>,
}

impl DtwAlignment {
    /// Whether the cumulative cost of `(i, j)` was filled in.
    pub fn was_computed(&self, i: usize, j: usize) -> bool {
        self.accumulated.get(i, j).is_finite()
    }
}

/// Minimum cumulative-cost alignment over a precomputed cost matrix.
pub fn dtw(cost: &CostMatrix, band: Band) -> Result<DtwAlignment, ScoringError> {
    let (n, m) = (cost.rows(), cost.cols());
    if n == 0 || m == 0 {
        return Err(ScoringError::invalid_input(format!(
            "dtw needs two non-empty sequences, got {n}x{m}"
        )));
    }
    let width = band.effective_width(n, m);
    let accumulated = accumulate(cost, width);
    let total_cost = accumulated.get(n - 1, m - 1);
    let path = backtrack(&accumulated);
    Ok(DtwAlignment {
        total_cost,
        normalized_cost: total_cost / (n + m) as f64,
        path,
        accumulated,
        band_width: width,
    })
}

/// DTW between two sequences with a per-pair distance, evaluated only in-band.
pub fn dtw_sequences<A, B>(
    a: &[A],
    b: &[B],
    band: Band,
    mut distance: impl FnMut(&A, &B) -> f64,
) -> Result<DtwAlignment, ScoringError> {
    let width = band.effective_width(a.len(), b.len());
    let cost = CostMatrix::from_fn(a.len(), b.len(), width, |i, j| distance(&a[i], &b[j]));
    dtw(&cost, band)
}

fn accumulate(cost: &CostMatrix, width: Option<usize>) -> CostMatrix {
    let (n, m) = (cost.rows(), cost.cols());
    let mut acc = CostMatrix::filled(n, m, INFINITE_COST);
    for i in 0..n {
        let Some((lo, hi)) = band_range(i, m, width) else {
            continue;
        };
        for j in lo..=hi {
            let best_prev = if i == 0 && j == 0 {
                0.0
            } else {
                let diag = if i > 0 && j > 0 { acc.get(i - 1, j - 1) } else { INFINITE_COST };
                let up = if i > 0 { acc.get(i - 1, j) } else { INFINITE_COST };
                let left = if j > 0 { acc.get(i, j - 1) } else { INFINITE_COST };
                diag.min(up).min(left)
            };
            acc.set(i, j, cost.get(i, j) + best_prev);
        }
    }
    acc
}

/// Walks back from `(n-1, m-1)`; ties prefer diagonal, then up, then left.
fn backtrack(acc: &CostMatrix) -> Vec<(usize, usize)> {
    let (mut i, mut j) = (acc.rows() - 1, acc.cols() - 1);
    let mut path = Vec::with_capacity(acc.rows() + acc.cols());
    path.push((i, j));
    while i > 0 || j > 0 {
        if i == 0 {
            j -= 1;
        } else if j == 0 {
            i -= 1;
        } else {
            let diag = acc.get(i - 1, j - 1);
            let up = acc.get(i - 1, j);
            let left = acc.get(i, j - 1);
            if diag <= up && diag <= left {
                i -= 1;
                j -= 1;
            } else if up <= left {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        path.push((i, j));
    }
    path.reverse();
    path
}

/// Alignment cost where vertical/horizontal steps pay `gap_penalty` and
/// diagonal steps pay `substitution(i, j)`; the path must open diagonally.
pub fn gapped_alignment_cost(
    n: usize,
    m: usize,
    band: Band,
    gap_penalty: f64,
    mut substitution: impl FnMut(usize, usize) -> f64,
) -> f64 {
    if n == 0 || m == 0 {
        return INFINITE_COST;
    }
    let width = band.effective_width(n, m);
    let stride = m + 1;
    let mut d = vec![INFINITE_COST; (n + 1) * stride];
    d[0] = 0.0;
    for i in 1..=n {
        let (lo, hi) = match width {
            None => (1, m),
            Some(w) => (i.saturating_sub(w).max(1), (i + w).min(m)),
        };
        for j in lo..=hi {
            let diag = d[(i - 1) * stride + j - 1] + substitution(i - 1, j - 1);
            let up = d[(i - 1) * stride + j] + gap_penalty;
            let left = d[i * stride + j - 1] + gap_penalty;
            d[i * stride + j] = diag.min(up).min(left);
        }
    }
    d[n * stride + m]
}
