//! Standalone reductions: softmax, argmax, top-k (spec §4.2.8).

/// Numerically stable softmax in place (subtracts the row max first).
pub fn softmax(scores: &mut [f32]) {
    if scores.is_empty() {
        return;
    }
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0f32;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    if sum > 0.0 {
        for s in scores.iter_mut() {
            *s /= sum;
        }
    }
}

/// Index of the maximum value, ties broken by lowest index.
pub fn argmax(values: &[f32]) -> usize {
    let mut best_idx = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i;
        }
    }
    best_idx
}

/// Top-`k` `(index, value)` pairs, sorted descending by value. Ties broken
/// by lowest index, matching `argmax`'s tie-break.
pub fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
    indexed.truncate(k);
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let mut v = vec![1.0f32, 2.0, 3.0];
        softmax(&mut v);
        let sum: f32 = v.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn softmax_is_shift_invariant() {
        let mut a = vec![1.0f32, 2.0, 3.0];
        let mut b = vec![101.0f32, 102.0, 103.0];
        softmax(&mut a);
        softmax(&mut b);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn argmax_breaks_ties_with_lowest_index() {
        let v = [1.0f32, 3.0, 3.0, 2.0];
        assert_eq!(argmax(&v), 1);
    }

    #[test]
    fn top_k_sorted_descending() {
        let v = [1.0f32, 5.0, 3.0, 4.0];
        let top = top_k(&v, 2);
        assert_eq!(top, vec![(1, 5.0), (3, 4.0)]);
    }
}
