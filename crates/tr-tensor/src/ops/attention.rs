//! Causal multi-head attention over a fused QKV buffer.
//!
//! `inp` is (b, t, 3c): the concatenation of Q, K, V along the channel axis.
//! Within each of Q/K/V, head `h` occupies channels `[h*hs, (h+1)*hs)` where
//! `hs = c / nh`. The attention matrices `preatt`/`att` are (b, nh, t, t).

use rayon::prelude::*;

/// Causal attention forward pass.
///
/// Per `(b, h, t)` row: scaled QK scores into `preatt` (scale `1/sqrt(hs)`
/// applied once, here), max-shifted softmax into `att` with the `t2 > t`
/// triangle explicitly zeroed, then the value-weighted sum into `out`
/// (shape (b, t, c)).
///
/// Runs in two row-parallel phases: attention rows `(b, h, t)` first, output
/// rows `(b, t)` second.
pub fn attention_forward(
    out: &mut [f32],
    preatt: &mut [f32],
    att: &mut [f32],
    inp: &[f32],
    b: usize,
    t: usize,
    c: usize,
    nh: usize,
) {
    debug_assert_eq!(c % nh, 0);
    debug_assert!(out.len() >= b * t * c);
    debug_assert!(preatt.len() >= b * nh * t * t);
    debug_assert!(att.len() >= b * nh * t * t);
    debug_assert!(inp.len() >= b * t * 3 * c);
    let c3 = 3 * c;
    let hs = c / nh;
    let scale = 1.0 / (hs as f32).sqrt();

    // Phase 1: scores and softmax, one (b, h, t) row per task.
    preatt[..b * nh * t * t]
        .par_chunks_mut(t)
        .zip(att[..b * nh * t * t].par_chunks_mut(t))
        .enumerate()
        .for_each(|(row, (preatt_row, att_row))| {
            let bi = row / (nh * t);
            let h = (row / t) % nh;
            let ti = row % t;
            let query = &inp[bi * t * c3 + ti * c3 + h * hs..][..hs];

            let mut maxval = f32::NEG_INFINITY;
            for t2 in 0..=ti {
                let key = &inp[bi * t * c3 + t2 * c3 + h * hs + c..][..hs];
                let mut val = 0.0f32;
                for i in 0..hs {
                    val += query[i] * key[i];
                }
                val *= scale;
                if val > maxval {
                    maxval = val;
                }
                preatt_row[t2] = val;
            }

            let mut expsum = 0.0f32;
            for t2 in 0..=ti {
                let expv = (preatt_row[t2] - maxval).exp();
                expsum += expv;
                att_row[t2] = expv;
            }
            let expsum_inv = if expsum == 0.0 { 0.0 } else { 1.0 / expsum };

            for (t2, a) in att_row.iter_mut().enumerate() {
                if t2 <= ti {
                    *a *= expsum_inv;
                } else {
                    // Explicit causal mask.
                    *a = 0.0;
                }
            }
        });

    // Phase 2: value accumulation, one (b, t) output row per task.
    out[..b * t * c]
        .par_chunks_mut(c)
        .enumerate()
        .for_each(|(bt, out_bt)| {
            let bi = bt / t;
            let ti = bt % t;
            out_bt.fill(0.0);
            for h in 0..nh {
                let att_row = &att[bi * nh * t * t + h * t * t + ti * t..][..t];
                for t2 in 0..=ti {
                    let value = &inp[bi * t * c3 + t2 * c3 + h * hs + 2 * c..][..hs];
                    let a = att_row[t2];
                    for i in 0..hs {
                        out_bt[h * hs + i] += a * value[i];
                    }
                }
            }
        });
}

/// Causal attention backward pass, accumulating into `dinp` (the fused QKV
/// gradient), `dpreatt`, and `datt`.
///
/// Serial: the value and key gradients of position `t2` collect contributions
/// from every later query position, so row-parallelism would race.
pub fn attention_backward(
    dinp: &mut [f32],
    dpreatt: &mut [f32],
    datt: &mut [f32],
    dout: &[f32],
    inp: &[f32],
    att: &[f32],
    b: usize,
    t: usize,
    c: usize,
    nh: usize,
) {
    debug_assert_eq!(c % nh, 0);
    let c3 = 3 * c;
    let hs = c / nh;
    let scale = 1.0 / (hs as f32).sqrt();

    for bi in 0..b {
        for ti in 0..t {
            for h in 0..nh {
                let att_base = bi * nh * t * t + h * t * t + ti * t;
                let q_base = bi * t * c3 + ti * c3 + h * hs;
                let dout_base = bi * t * c + ti * c + h * hs;

                // Backward through the value accumulation.
                for t2 in 0..=ti {
                    let v_base = bi * t * c3 + t2 * c3 + h * hs + 2 * c;
                    for i in 0..hs {
                        datt[att_base + t2] += inp[v_base + i] * dout[dout_base + i];
                        dinp[v_base + i] += att[att_base + t2] * dout[dout_base + i];
                    }
                }

                // Backward through the softmax: full quadratic Jacobian
                // contraction, restricted to the causal triangle.
                for t2 in 0..=ti {
                    for t3 in 0..=ti {
                        let indicator = if t2 == t3 { 1.0 } else { 0.0 };
                        let local =
                            att[att_base + t2] * (indicator - att[att_base + t3]);
                        dpreatt[att_base + t3] += local * datt[att_base + t2];
                    }
                }

                // Backward through the scaled QK dot product.
                for t2 in 0..=ti {
                    let k_base = bi * t * c3 + t2 * c3 + h * hs + c;
                    let dp = dpreatt[att_base + t2] * scale;
                    for i in 0..hs {
                        dinp[q_base + i] += inp[k_base + i] * dp;
                        dinp[k_base + i] += inp[q_base + i] * dp;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn qkv_fixture(b: usize, t: usize, c: usize) -> Vec<f32> {
        // Deterministic, smooth, non-degenerate values in roughly [-1, 1].
        (0..b * t * 3 * c)
            .map(|i| ((i as f32) * 0.37 + 0.1).sin())
            .collect()
    }

    #[test]
    fn test_forward_causality_and_row_sums() {
        let (b, t, c, nh) = (2, 4, 6, 2);
        let inp = qkv_fixture(b, t, c);
        let mut out = vec![0.0; b * t * c];
        let mut preatt = vec![0.0; b * nh * t * t];
        let mut att = vec![0.0; b * nh * t * t];
        attention_forward(&mut out, &mut preatt, &mut att, &inp, b, t, c, nh);

        for bi in 0..b {
            for h in 0..nh {
                for ti in 0..t {
                    let row = &att[bi * nh * t * t + h * t * t + ti * t..][..t];
                    let sum: f32 = row[..=ti].iter().sum();
                    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5);
                    for &a in &row[..=ti] {
                        assert!((0.0..=1.0).contains(&a));
                    }
                    for &a in &row[ti + 1..] {
                        assert_eq!(a, 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_forward_first_position_copies_value() {
        // At t=0 the softmax has a single entry, so the output is exactly the
        // value vector of position 0 for each head.
        let (b, t, c, nh) = (1, 3, 4, 2);
        let inp = qkv_fixture(b, t, c);
        let mut out = vec![0.0; b * t * c];
        let mut preatt = vec![0.0; b * nh * t * t];
        let mut att = vec![0.0; b * nh * t * t];
        attention_forward(&mut out, &mut preatt, &mut att, &inp, b, t, c, nh);

        let hs = c / nh;
        for h in 0..nh {
            for i in 0..hs {
                let v = inp[h * hs + 2 * c + i];
                assert_abs_diff_eq!(out[h * hs + i], v, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let (b, t, c, nh) = (1, 3, 4, 2);
        let inp = qkv_fixture(b, t, c);
        let coeff: Vec<f32> = (0..b * t * c)
            .map(|i| ((i as f32) * 0.91 - 0.4).cos())
            .collect();

        let loss = |inp: &[f32]| -> f32 {
            let mut out = vec![0.0; b * t * c];
            let mut preatt = vec![0.0; b * nh * t * t];
            let mut att = vec![0.0; b * nh * t * t];
            attention_forward(&mut out, &mut preatt, &mut att, inp, b, t, c, nh);
            out.iter().zip(&coeff).map(|(o, w)| o * w).sum()
        };

        let mut out = vec![0.0; b * t * c];
        let mut preatt = vec![0.0; b * nh * t * t];
        let mut att = vec![0.0; b * nh * t * t];
        attention_forward(&mut out, &mut preatt, &mut att, &inp, b, t, c, nh);

        let mut dinp = vec![0.0; inp.len()];
        let mut dpreatt = vec![0.0; preatt.len()];
        let mut datt = vec![0.0; att.len()];
        attention_backward(
            &mut dinp, &mut dpreatt, &mut datt, &coeff, &inp, &att, b, t, c, nh,
        );

        let eps = 1e-2;
        for i in 0..inp.len() {
            let mut plus = inp.clone();
            let mut minus = inp.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(dinp[i], numeric, epsilon = 2e-2);
        }
    }
}
