//! LayerNorm over the channel axis, with cached statistics for backward.

const EPS: f32 = 1e-5;

/// Normalize each (b, t) row of `inp` and apply the affine transform.
///
/// `out[b,t,i] = (inp[b,t,i] - m) * s * weight[i] + bias[i]` where `m` is the
/// row mean and `s = 1/sqrt(var + 1e-5)` with population variance. The per-row
/// statistics are cached in `mean` and `rstd` (each shape (b, t)) for the
/// backward pass.
pub fn layernorm_forward(
    out: &mut [f32],
    mean: &mut [f32],
    rstd: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: &[f32],
    b: usize,
    t: usize,
    c: usize,
) {
    debug_assert!(out.len() >= b * t * c);
    debug_assert!(inp.len() >= b * t * c);
    debug_assert!(weight.len() >= c && bias.len() >= c);
    for bt in 0..b * t {
        let x = &inp[bt * c..(bt + 1) * c];

        let mut m = 0.0f32;
        for &xi in x {
            m += xi;
        }
        m /= c as f32;

        let mut v = 0.0f32;
        for &xi in x {
            let xshift = xi - m;
            v += xshift * xshift;
        }
        v /= c as f32;

        let s = 1.0 / (v + EPS).sqrt();

        let out_bt = &mut out[bt * c..(bt + 1) * c];
        for i in 0..c {
            let n = s * (x[i] - m);
            out_bt[i] = n * weight[i] + bias[i];
        }

        mean[bt] = m;
        rstd[bt] = s;
    }
}

/// LayerNorm backward using the cached `mean`/`rstd`.
///
/// Per row, with `norm_i = (x_i - m) * s` and `dnorm_i = weight_i * dout_i`:
///   dbias_i   += dout_i
///   dweight_i += norm_i * dout_i
///   dinp_i    += s * (dnorm_i - mean(dnorm) - norm_i * mean(dnorm * norm))
pub fn layernorm_backward(
    dinp: &mut [f32],
    dweight: &mut [f32],
    dbias: &mut [f32],
    dout: &[f32],
    inp: &[f32],
    weight: &[f32],
    mean: &[f32],
    rstd: &[f32],
    b: usize,
    t: usize,
    c: usize,
) {
    debug_assert!(dinp.len() >= b * t * c);
    debug_assert!(dweight.len() >= c && dbias.len() >= c);
    for bt in 0..b * t {
        let dout_bt = &dout[bt * c..(bt + 1) * c];
        let inp_bt = &inp[bt * c..(bt + 1) * c];
        let m = mean[bt];
        let s = rstd[bt];

        // Two reductions over the row first.
        let mut dnorm_mean = 0.0f32;
        let mut dnorm_norm_mean = 0.0f32;
        for i in 0..c {
            let norm = (inp_bt[i] - m) * s;
            let dnorm = weight[i] * dout_bt[i];
            dnorm_mean += dnorm;
            dnorm_norm_mean += dnorm * norm;
        }
        dnorm_mean /= c as f32;
        dnorm_norm_mean /= c as f32;

        // Second sweep accumulates all three gradients.
        let dinp_bt = &mut dinp[bt * c..(bt + 1) * c];
        for i in 0..c {
            let norm = (inp_bt[i] - m) * s;
            let dnorm = weight[i] * dout_bt[i];
            dbias[i] += dout_bt[i];
            dweight[i] += norm * dout_bt[i];
            dinp_bt[i] += s * (dnorm - dnorm_mean - norm * dnorm_norm_mean);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_forward_normalizes_rows() {
        let inp = vec![1.0, 2.0, 3.0, 4.0];
        let weight = vec![1.0; 4];
        let bias = vec![0.0; 4];
        let mut out = vec![0.0; 4];
        let mut mean = vec![0.0; 1];
        let mut rstd = vec![0.0; 1];
        layernorm_forward(&mut out, &mut mean, &mut rstd, &inp, &weight, &bias, 1, 1, 4);

        // Output row has zero mean and unit variance.
        let out_mean: f32 = out.iter().sum::<f32>() / 4.0;
        let out_var: f32 = out.iter().map(|o| (o - out_mean) * (o - out_mean)).sum::<f32>() / 4.0;
        assert_abs_diff_eq!(out_mean, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out_var, 1.0, epsilon = 1e-4);

        // Cached statistics satisfy rstd * sqrt(var + eps) == 1.
        assert_abs_diff_eq!(mean[0], 2.5, epsilon = 1e-6);
        let var: f32 = inp.iter().map(|x| (x - 2.5) * (x - 2.5)).sum::<f32>() / 4.0;
        assert_abs_diff_eq!(rstd[0] * (var + EPS).sqrt(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_forward_applies_affine() {
        let inp = vec![1.0, 3.0];
        let weight = vec![2.0, 2.0];
        let bias = vec![10.0, 10.0];
        let mut out = vec![0.0; 2];
        let mut mean = vec![0.0; 1];
        let mut rstd = vec![0.0; 1];
        layernorm_forward(&mut out, &mut mean, &mut rstd, &inp, &weight, &bias, 1, 1, 2);
        // Normalized row is [-1, 1] (up to eps), so out ~= [8, 12].
        assert_abs_diff_eq!(out[0], 8.0, epsilon = 1e-3);
        assert_abs_diff_eq!(out[1], 12.0, epsilon = 1e-3);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let c = 4;
        let inp = vec![0.5, -1.0, 2.0, 0.25];
        let weight = vec![1.5, 0.5, -1.0, 2.0];
        let bias = vec![0.1, -0.2, 0.3, 0.0];
        // Fixed projection makes the scalar loss L = sum_i coeff_i * out_i.
        let coeff = vec![0.3, -0.7, 0.2, 1.1];

        let loss = |x: &[f32]| -> f32 {
            let mut out = vec![0.0; c];
            let mut mean = vec![0.0; 1];
            let mut rstd = vec![0.0; 1];
            layernorm_forward(&mut out, &mut mean, &mut rstd, x, &weight, &bias, 1, 1, c);
            out.iter().zip(&coeff).map(|(o, w)| o * w).sum()
        };

        let mut out = vec![0.0; c];
        let mut mean = vec![0.0; 1];
        let mut rstd = vec![0.0; 1];
        layernorm_forward(&mut out, &mut mean, &mut rstd, &inp, &weight, &bias, 1, 1, c);

        let mut dinp = vec![0.0; c];
        let mut dweight = vec![0.0; c];
        let mut dbias = vec![0.0; c];
        layernorm_backward(
            &mut dinp, &mut dweight, &mut dbias, &coeff, &inp, &weight, &mean, &rstd, 1, 1, c,
        );

        let eps = 1e-2;
        for i in 0..c {
            let mut plus = inp.clone();
            let mut minus = inp.clone();
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(dinp[i], numeric, epsilon = 2e-2);
        }
        // dbias is just dout.
        for i in 0..c {
            assert_abs_diff_eq!(dbias[i], coeff[i], epsilon = 1e-6);
        }
    }
}
