//! Row-wise softmax over the vocabulary, used for the final logits only.

use rayon::prelude::*;

/// `probs[b,t,:] = softmax(logits[b,t,:])` over rows of length `v`, with the
/// per-row max subtracted before exponentiation for numerical stability.
///
/// Parallel over the `(b, t)` rows.
///
/// There is intentionally no standalone softmax backward: the engine only
/// differentiates through softmax via the fused cross-entropy backward
/// (`crossentropy_softmax_backward`).
pub fn softmax_forward(probs: &mut [f32], logits: &[f32], b: usize, t: usize, v: usize) {
    debug_assert!(probs.len() >= b * t * v);
    debug_assert!(logits.len() >= b * t * v);
    probs[..b * t * v]
        .par_chunks_mut(v)
        .zip(logits[..b * t * v].par_chunks(v))
        .for_each(|(probs_bt, logits_bt)| {
            let mut maxval = f32::NEG_INFINITY;
            for &l in logits_bt {
                if l > maxval {
                    maxval = l;
                }
            }
            let mut sum = 0.0f32;
            for i in 0..v {
                let e = (logits_bt[i] - maxval).exp();
                probs_bt[i] = e;
                sum += e;
            }
            for p in probs_bt.iter_mut() {
                *p /= sum;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rows_sum_to_one() {
        let logits = vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0];
        let mut probs = vec![0.0; 6];
        softmax_forward(&mut probs, &logits, 1, 2, 3);
        for row in probs.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
            for &p in row {
                assert!((0.0..=1.0).contains(&p));
            }
        }
        // Larger logit, larger probability.
        assert!(probs[0] < probs[1] && probs[1] < probs[2]);
    }

    #[test]
    fn test_max_shift_handles_large_logits() {
        let logits = vec![1e4, 1e4 + 1.0];
        let mut probs = vec![0.0; 2];
        softmax_forward(&mut probs, &logits, 1, 1, 2);
        let sum: f32 = probs.iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
        assert!(probs[1] > probs[0]);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_uniform_logits_give_uniform_probs() {
        let logits = vec![0.5; 4];
        let mut probs = vec![0.0; 4];
        softmax_forward(&mut probs, &logits, 1, 1, 4);
        for &p in &probs {
            assert_abs_diff_eq!(p, 0.25, epsilon = 1e-6);
        }
    }
}
