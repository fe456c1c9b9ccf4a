//! AdamW optimizer with bias correction and decoupled weight decay.

/// Optimizer state: first/second moment vectors mirroring the parameter
/// buffer layout, plus the step counter driving bias correction.
pub struct AdamW {
    step: usize,
    /// First moment (mean of gradients).
    m: Vec<f32>,
    /// Second moment (mean of squared gradients).
    v: Vec<f32>,
}

impl AdamW {
    /// Create zeroed optimizer state for `n_params` parameters.
    pub fn new(n_params: usize) -> Self {
        AdamW {
            step: 0,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
        }
    }

    /// Number of update steps taken so far.
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Perform one AdamW step in place.
    ///
    /// Moments use bias correction `1 - beta^t`; weight decay is decoupled,
    /// i.e. applied to the parameter directly rather than folded into the
    /// moment estimates.
    pub fn update(
        &mut self,
        params: &mut [f32],
        grads: &[f32],
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
        weight_decay: f32,
    ) {
        assert_eq!(params.len(), grads.len());
        assert_eq!(params.len(), self.m.len());
        self.step += 1;
        let bc1 = 1.0 - beta1.powi(self.step as i32);
        let bc2 = 1.0 - beta2.powi(self.step as i32);
        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = beta1 * self.m[i] + (1.0 - beta1) * g;
            self.v[i] = beta2 * self.v[i] + (1.0 - beta2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            params[i] -=
                learning_rate * (m_hat / (v_hat.sqrt() + eps) + weight_decay * params[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_zero_betas_reduce_to_sign_step() {
        // With beta1 = beta2 = 0 and no decay, m_hat = g and v_hat = g^2,
        // so each parameter moves by -lr * sign(g).
        let mut opt = AdamW::new(3);
        let mut params = vec![1.0, -2.0, 0.5];
        let grads = vec![0.3, -0.7, 2.0];
        opt.update(&mut params, &grads, 0.1, 0.0, 0.0, 1e-8, 0.0);
        assert_abs_diff_eq!(params[0], 0.9, epsilon = 1e-5);
        assert_abs_diff_eq!(params[1], -1.9, epsilon = 1e-5);
        assert_abs_diff_eq!(params[2], 0.4, epsilon = 1e-5);
        assert_eq!(opt.step_count(), 1);
    }

    #[test]
    fn test_decay_is_decoupled() {
        // Zero gradient: the Adam term vanishes and only decay moves the
        // parameter, by exactly -lr * wd * theta.
        let mut opt = AdamW::new(1);
        let mut params = vec![2.0];
        let grads = vec![0.0];
        opt.update(&mut params, &grads, 0.1, 0.9, 0.999, 1e-8, 0.5);
        assert_abs_diff_eq!(params[0], 2.0 - 0.1 * 0.5 * 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bias_correction_first_step() {
        // On step 1 the corrected moments equal the raw gradient statistics,
        // so the step matches the beta-free form.
        let mut opt = AdamW::new(1);
        let mut params = vec![0.0];
        let grads = vec![4.0];
        opt.update(&mut params, &grads, 0.01, 0.9, 0.999, 1e-8, 0.0);
        // m_hat = 4, v_hat = 16, step = -0.01 * 4 / (4 + eps).
        assert_abs_diff_eq!(params[0], -0.01, epsilon = 1e-6);
    }
}
