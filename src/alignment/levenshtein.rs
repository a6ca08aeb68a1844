/// Unit-cost edit distance (substitution, insertion, deletion).
pub fn edit_distance<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> usize {
    if reference.is_empty() {
        return hypothesis.len();
    }
    if hypothesis.is_empty() {
        return reference.len();
    }

    let mut prev: Vec<usize> = (0..=hypothesis.len()).collect();
    let mut curr = vec![0usize; hypothesis.len() + 1];
    for (i, r) in reference.iter().enumerate() {
        curr[0] = i + 1;
        for (j, h) in hypothesis.iter().enumerate() {
            curr[j + 1] = if r == h {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[hypothesis.len()]
}

/// Edit distance normalized by reference length; `0.0` for an empty reference.
///
/// Not capped at 1: insertions can push the rate above one.
pub fn error_rate<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    edit_distance(reference, hypothesis) as f64 / reference.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_examples() {
        let a: Vec<char> = "kitten".chars().collect();
        let b: Vec<char> = "sitting".chars().collect();
        assert_eq!(edit_distance(&a, &b), 3);
        assert_eq!(edit_distance(&b, &a), 3);
    }

    #[test]
    fn empty_sides() {
        let empty: [&str; 0] = [];
        assert_eq!(edit_distance(&empty, &["a", "b"]), 2);
        assert_eq!(edit_distance(&["a", "b", "c"], &empty), 3);
        assert_eq!(error_rate(&empty, &["a"]), 0.0);
    }

    #[test]
    fn single_substitution_rate_is_one_over_n() {
        let reference = ["h", "ɛ", "l", "oʊ"];
        let hypothesis = ["h", "ə", "l", "oʊ"];
        assert_eq!(error_rate(&reference, &hypothesis), 0.25);
    }

    #[test]
    fn insertions_can_exceed_one() {
        assert_eq!(error_rate(&["a"], &["x", "y", "z"]), 3.0);
    }
}
