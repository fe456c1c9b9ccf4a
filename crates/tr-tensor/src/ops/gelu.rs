//! GELU activation (tanh approximation) and its exact derivative.

const GELU_SCALE: f32 = 0.7978845608028654; // sqrt(2 / pi)

/// `gelu(x) = 0.5 * x * (1 + tanh(sqrt(2/pi) * (x + 0.044715 * x^3)))`,
/// applied elementwise; `out` and `inp` have the same length.
pub fn gelu_forward(out: &mut [f32], inp: &[f32]) {
    debug_assert_eq!(out.len(), inp.len());
    for (o, &x) in out.iter_mut().zip(inp) {
        let cube = 0.044715 * x * x * x;
        *o = 0.5 * x * (1.0 + (GELU_SCALE * (x + cube)).tanh());
    }
}

/// Exact derivative of the tanh-approximated GELU, accumulated into `dinp`.
pub fn gelu_backward(dinp: &mut [f32], inp: &[f32], dout: &[f32]) {
    debug_assert_eq!(dinp.len(), inp.len());
    debug_assert_eq!(dinp.len(), dout.len());
    for i in 0..inp.len() {
        let x = inp[i];
        let cube = 0.044715 * x * x * x;
        let tanh_arg = GELU_SCALE * (x + cube);
        let tanh_out = tanh_arg.tanh();
        let sech2 = 1.0 - tanh_out * tanh_out;
        let local = 0.5 * (1.0 + tanh_out)
            + x * 0.5 * sech2 * GELU_SCALE * (1.0 + 3.0 * 0.044715 * x * x);
        dinp[i] += local * dout[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_forward_known_values() {
        let inp = vec![0.0, 1.0, -1.0, 10.0];
        let mut out = vec![0.0; 4];
        gelu_forward(&mut out, &inp);
        assert_abs_diff_eq!(out[0], 0.0, epsilon = 1e-7);
        // gelu(1) ~= 0.841192
        assert_abs_diff_eq!(out[1], 0.841192, epsilon = 1e-4);
        // The tanh form satisfies gelu(x) - gelu(-x) = x.
        assert_abs_diff_eq!(out[1] - out[2], 1.0, epsilon = 1e-5);
        // Saturates to identity for large x.
        assert_abs_diff_eq!(out[3], 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let inp = vec![-2.0, -0.5, 0.0, 0.3, 1.7];
        let dout = vec![1.0; 5];
        let mut dinp = vec![0.0; 5];
        gelu_backward(&mut dinp, &inp, &dout);

        let eps = 1e-3;
        for i in 0..inp.len() {
            let mut plus = vec![0.0];
            let mut minus = vec![0.0];
            gelu_forward(&mut plus, &[inp[i] + eps]);
            gelu_forward(&mut minus, &[inp[i] - eps]);
            let numeric = (plus[0] - minus[0]) / (2.0 * eps);
            assert_abs_diff_eq!(dinp[i], numeric, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_backward_accumulates() {
        let inp = vec![0.0];
        let dout = vec![2.0];
        let mut dinp = vec![10.0];
        gelu_backward(&mut dinp, &inp, &dout);
        // gelu'(0) = 0.5, so 10 + 0.5 * 2 = 11.
        assert_abs_diff_eq!(dinp[0], 11.0, epsilon = 1e-6);
    }
}
