//! The GPT-2 training engine.
//!
//! Owns the flat parameter buffer (and, lazily, its gradient twin, the
//! activation buffers, and the optimizer state) and drives the per-layer
//! forward and backward passes by slicing per-tensor and per-layer windows
//! out of the flat allocations.

use std::path::Path;

use tr_tensor::ops;

use crate::adamw::AdamW;
use crate::checkpoint;
use crate::config::GptConfig;
use crate::error::{ModelError, Result};
use crate::plan::{ActPlan, ParamPlan};

/// Activation storage: one flat buffer plus the plan that indexes it.
/// The plan's `(batch_size, seq_len)` is the allocation shape locked in by
/// the first forward pass.
struct Activations {
    plan: ActPlan,
    data: Vec<f32>,
}

pub struct Gpt2 {
    config: GptConfig,
    param_plan: ParamPlan,
    /// Flat parameter buffer, alive for the engine's lifetime.
    params: Vec<f32>,
    /// Parameter gradients, allocated zeroed on first `backward`.
    grads: Option<Vec<f32>>,
    /// Activations, allocated on first `forward`.
    acts: Option<Activations>,
    /// Activation gradients, allocated zeroed on first `backward`.
    grads_acts: Option<Vec<f32>>,
    /// AdamW moments, allocated on first `update`.
    optimizer: Option<AdamW>,
    /// Input/target scratch, capacity B*T, overwritten per forward.
    inputs: Vec<i32>,
    targets: Vec<i32>,
    /// Shape of the most recent forward (may be smaller than the allocation).
    cur_batch: usize,
    cur_seq: usize,
    /// `None` until a forward pass runs with targets.
    mean_loss: Option<f32>,
}

impl Gpt2 {
    /// Build an engine from a config and a parameter buffer.
    ///
    /// # Errors
    /// Returns `BadPayloadSize` if `params` does not match the plan size.
    pub fn new(config: GptConfig, params: Vec<f32>) -> Result<Gpt2> {
        let param_plan = ParamPlan::new(&config);
        if params.len() != param_plan.total() {
            return Err(ModelError::BadPayloadSize {
                expected: param_plan.total(),
                got: params.len(),
            });
        }
        Ok(Gpt2 {
            config,
            param_plan,
            params,
            grads: None,
            acts: None,
            grads_acts: None,
            optimizer: None,
            inputs: Vec::new(),
            targets: Vec::new(),
            cur_batch: 0,
            cur_seq: 0,
            mean_loss: None,
        })
    }

    /// Load an engine from a checkpoint file.
    pub fn from_checkpoint(path: &Path) -> Result<Gpt2> {
        let (config, params) = checkpoint::load(path)?;
        Gpt2::new(config, params)
    }

    pub fn config(&self) -> &GptConfig {
        &self.config
    }

    pub fn num_parameters(&self) -> usize {
        self.params.len()
    }

    /// The flat parameter buffer, in checkpoint order.
    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Mean cross-entropy of the last targeted forward, `None` otherwise.
    pub fn mean_loss(&self) -> Option<f32> {
        self.mean_loss
    }

    /// Softmax probabilities for position `(bi, ti)` of the last forward.
    pub fn probs_row(&self, bi: usize, ti: usize) -> Result<&[f32]> {
        let acts = self
            .acts
            .as_ref()
            .ok_or(ModelError::StateViolation("no forward pass has run yet"))?;
        if bi >= self.cur_batch || ti >= self.cur_seq {
            return Err(ModelError::Other(format!(
                "position (b={}, t={}) outside the last forward shape (B={}, T={})",
                bi, ti, self.cur_batch, self.cur_seq
            )));
        }
        let v = self.config.n_vocab;
        let probs = acts.plan.probs.slice(&acts.data)?;
        let base = (bi * self.cur_seq + ti) * v;
        Ok(&probs[base..base + v])
    }

    fn check_tokens(&self, tokens: &[i32], n: usize, what: &str) -> Result<()> {
        if tokens.len() < n {
            return Err(ModelError::Other(format!(
                "{} has {} tokens, batch needs {}",
                what,
                tokens.len(),
                n
            )));
        }
        for &tok in &tokens[..n] {
            if tok < 0 || tok as usize >= self.config.n_vocab {
                return Err(ModelError::InvalidToken {
                    token: tok,
                    n_vocab: self.config.n_vocab,
                });
            }
        }
        Ok(())
    }

    /// Run the forward pass on a `(b, t)` batch of token ids.
    ///
    /// The first call locks `(b, t)` as the activation allocation shape;
    /// later calls may shrink either dimension but never grow them. With
    /// `targets`, per-position cross-entropy is computed and `mean_loss` set;
    /// without, `mean_loss` becomes `None` and `backward` is rejected.
    pub fn forward(
        &mut self,
        inputs: &[i32],
        targets: Option<&[i32]>,
        b: usize,
        t: usize,
    ) -> Result<()> {
        let v = self.config.n_vocab;
        let nl = self.config.n_layers;
        let nh = self.config.n_heads;
        let c = self.config.n_embd;

        self.check_tokens(inputs, b * t, "inputs")?;
        if let Some(targets) = targets {
            self.check_tokens(targets, b * t, "targets")?;
        }

        match self.acts.as_ref() {
            Some(acts) if b > acts.plan.batch_size || t > acts.plan.seq_len => {
                return Err(ModelError::ShapeOverflow {
                    batch: b,
                    seq: t,
                    max_batch: acts.plan.batch_size,
                    max_seq: acts.plan.seq_len,
                });
            }
            None if t > self.config.max_seq_len => {
                return Err(ModelError::ShapeOverflow {
                    batch: b,
                    seq: t,
                    max_batch: b,
                    max_seq: self.config.max_seq_len,
                });
            }
            _ => {}
        }
        if self.acts.is_none() {
            self.inputs = vec![0; b * t];
            self.targets = vec![0; b * t];
        }
        let config = self.config.clone();
        let acts = self.acts.get_or_insert_with(|| {
            let plan = ActPlan::new(&config, b, t);
            log::debug!(
                "allocating {} activation floats for B={} T={}",
                plan.total(),
                b,
                t
            );
            Activations {
                data: vec![0.0; plan.total()],
                plan,
            }
        });

        self.cur_batch = b;
        self.cur_seq = t;
        self.inputs[..b * t].copy_from_slice(&inputs[..b * t]);
        let has_targets = match targets {
            Some(targets) => {
                self.targets[..b * t].copy_from_slice(&targets[..b * t]);
                true
            }
            None => false,
        };

        let p = self.param_plan.split(&self.params);
        let a = acts.plan.split_mut(&mut acts.data);

        // Dense sizes of the current batch, and allocation strides between
        // consecutive layer slabs.
        let (ab, at) = (acts.plan.batch_size, acts.plan.seq_len);
        let bt = b * t;
        let btc = bt * c;
        let s_btc = ab * at * c;
        let s_bt = ab * at;
        let s_bt3c = ab * at * 3 * c;
        let s_bt4c = ab * at * 4 * c;
        let s_att = ab * nh * at * at;
        let r_btc = |l: usize| l * s_btc..l * s_btc + btc;
        let r_bt = |l: usize| l * s_bt..l * s_bt + bt;
        let r_bt3c = |l: usize| l * s_bt3c..l * s_bt3c + bt * 3 * c;
        let r_bt4c = |l: usize| l * s_bt4c..l * s_bt4c + bt * 4 * c;
        let r_att = |l: usize| l * s_att..l * s_att + b * nh * t * t;
        // Per-layer windows into the parameter tensors.
        let r_c = |l: usize| l * c..(l + 1) * c;
        let r_3c = |l: usize| l * 3 * c..(l + 1) * 3 * c;
        let r_4c = |l: usize| l * 4 * c..(l + 1) * 4 * c;
        let r_cc = |l: usize| l * c * c..(l + 1) * c * c;
        let r_3cc = |l: usize| l * 3 * c * c..(l + 1) * 3 * c * c;
        let r_4cc = |l: usize| l * 4 * c * c..(l + 1) * 4 * c * c;

        ops::encoder_forward(&mut a.encoded[..btc], &self.inputs[..bt], p.wte, p.wpe, b, t, c);

        for l in 0..nl {
            let residual = if l == 0 {
                &a.encoded[..btc]
            } else {
                &a.residual3[r_btc(l - 1)]
            };

            ops::layernorm_forward(
                &mut a.ln1[r_btc(l)],
                &mut a.ln1_mean[r_bt(l)],
                &mut a.ln1_rstd[r_bt(l)],
                residual,
                &p.ln1w[r_c(l)],
                &p.ln1b[r_c(l)],
                b,
                t,
                c,
            );
            ops::matmul_forward(
                &mut a.qkv[r_bt3c(l)],
                &a.ln1[r_btc(l)],
                &p.qkvw[r_3cc(l)],
                Some(&p.qkvb[r_3c(l)]),
                b,
                t,
                c,
                3 * c,
            );
            ops::attention_forward(
                &mut a.atty[r_btc(l)],
                &mut a.preatt[r_att(l)],
                &mut a.att[r_att(l)],
                &a.qkv[r_bt3c(l)],
                b,
                t,
                c,
                nh,
            );
            ops::matmul_forward(
                &mut a.attproj[r_btc(l)],
                &a.atty[r_btc(l)],
                &p.attprojw[r_cc(l)],
                Some(&p.attprojb[r_c(l)]),
                b,
                t,
                c,
                c,
            );
            ops::residual_forward(&mut a.residual2[r_btc(l)], residual, &a.attproj[r_btc(l)]);
            ops::layernorm_forward(
                &mut a.ln2[r_btc(l)],
                &mut a.ln2_mean[r_bt(l)],
                &mut a.ln2_rstd[r_bt(l)],
                &a.residual2[r_btc(l)],
                &p.ln2w[r_c(l)],
                &p.ln2b[r_c(l)],
                b,
                t,
                c,
            );
            ops::matmul_forward(
                &mut a.fch[r_bt4c(l)],
                &a.ln2[r_btc(l)],
                &p.fcw[r_4cc(l)],
                Some(&p.fcb[r_4c(l)]),
                b,
                t,
                c,
                4 * c,
            );
            ops::gelu_forward(&mut a.fch_gelu[r_bt4c(l)], &a.fch[r_bt4c(l)]);
            ops::matmul_forward(
                &mut a.fcproj[r_btc(l)],
                &a.fch_gelu[r_bt4c(l)],
                &p.fcprojw[r_4cc(l)],
                Some(&p.fcprojb[r_c(l)]),
                b,
                t,
                4 * c,
                c,
            );
            ops::residual_forward(
                &mut a.residual3[r_btc(l)],
                &a.residual2[r_btc(l)],
                &a.fcproj[r_btc(l)],
            );
        }

        ops::layernorm_forward(
            &mut a.lnf[..btc],
            &mut a.lnf_mean[..bt],
            &mut a.lnf_rstd[..bt],
            &a.residual3[r_btc(nl - 1)],
            p.lnfw,
            p.lnfb,
            b,
            t,
            c,
        );
        // Logits reuse the token embedding as weight (tied), with no bias.
        ops::matmul_forward(&mut a.logits[..bt * v], &a.lnf[..btc], p.wte, None, b, t, c, v);
        ops::softmax_forward(&mut a.probs[..bt * v], &a.logits[..bt * v], b, t, v);

        self.mean_loss = if has_targets {
            ops::crossentropy_forward(
                &mut a.losses[..bt],
                &a.probs[..bt * v],
                &self.targets[..bt],
                b,
                t,
                v,
            );
            let sum: f32 = a.losses[..bt].iter().sum();
            Some(sum / bt as f32)
        } else {
            None
        };
        Ok(())
    }

    /// Zero both gradient buffers. No-op before the first `backward`.
    pub fn zero_grad(&mut self) {
        if let Some(grads) = self.grads.as_mut() {
            grads.fill(0.0);
        }
        if let Some(grads_acts) = self.grads_acts.as_mut() {
            grads_acts.fill(0.0);
        }
    }

    /// Backpropagate through the last targeted forward, accumulating into
    /// the parameter- and activation-gradient buffers.
    ///
    /// # Errors
    /// `StateViolation` if the last forward ran without targets (or no
    /// forward has run at all).
    pub fn backward(&mut self) -> Result<()> {
        if self.mean_loss.is_none() {
            return Err(ModelError::StateViolation(
                "backward requires a preceding forward with targets",
            ));
        }
        let acts = self
            .acts
            .as_ref()
            .ok_or(ModelError::StateViolation("no forward pass has run yet"))?;

        let v = self.config.n_vocab;
        let nl = self.config.n_layers;
        let nh = self.config.n_heads;
        let c = self.config.n_embd;
        let (b, t) = (self.cur_batch, self.cur_seq);

        // Gradient buffers allocate zeroed on first use; from then on,
        // `zero_grad` is the only zeroer.
        let n_params = self.param_plan.total();
        let grads = self.grads.get_or_insert_with(|| {
            log::debug!("allocating {} parameter gradient floats", n_params);
            vec![0.0; n_params]
        });
        let n_acts = acts.plan.total();
        let grads_acts = self
            .grads_acts
            .get_or_insert_with(|| vec![0.0; n_acts]);

        let p = self.param_plan.split(&self.params);
        let dp = self.param_plan.split_mut(grads);
        let a = acts.plan.split(&acts.data);
        let da = acts.plan.split_mut(grads_acts);

        let (ab, at) = (acts.plan.batch_size, acts.plan.seq_len);
        let bt = b * t;
        let btc = bt * c;
        let s_btc = ab * at * c;
        let s_bt = ab * at;
        let s_bt3c = ab * at * 3 * c;
        let s_bt4c = ab * at * 4 * c;
        let s_att = ab * nh * at * at;
        let r_btc = |l: usize| l * s_btc..l * s_btc + btc;
        let r_bt = |l: usize| l * s_bt..l * s_bt + bt;
        let r_bt3c = |l: usize| l * s_bt3c..l * s_bt3c + bt * 3 * c;
        let r_bt4c = |l: usize| l * s_bt4c..l * s_bt4c + bt * 4 * c;
        let r_att = |l: usize| l * s_att..l * s_att + b * nh * t * t;
        let r_c = |l: usize| l * c..(l + 1) * c;
        let r_3c = |l: usize| l * 3 * c..(l + 1) * 3 * c;
        let r_4c = |l: usize| l * 4 * c..(l + 1) * 4 * c;
        let r_cc = |l: usize| l * c * c..(l + 1) * c * c;
        let r_3cc = |l: usize| l * 3 * c * c..(l + 1) * 3 * c * c;
        let r_4cc = |l: usize| l * 4 * c * c..(l + 1) * 4 * c * c;

        // Seed: the mean loss distributes 1/(B*T) to every position. This is
        // the only overwrite in the backward pass.
        da.losses[..bt].fill(1.0 / bt as f32);

        ops::crossentropy_softmax_backward(
            &mut da.logits[..bt * v],
            &da.losses[..bt],
            &a.probs[..bt * v],
            &self.targets[..bt],
            b,
            t,
            v,
        );
        // Tied weights: this accumulates the logits contribution into
        // grads.wte; the encoder backward below adds the embedding one.
        ops::matmul_backward(
            &mut da.lnf[..btc],
            &mut dp.wte[..],
            None,
            &da.logits[..bt * v],
            &a.lnf[..btc],
            p.wte,
            b,
            t,
            c,
            v,
        );
        ops::layernorm_backward(
            &mut da.residual3[r_btc(nl - 1)],
            &mut dp.lnfw[..],
            &mut dp.lnfb[..],
            &da.lnf[..btc],
            &a.residual3[r_btc(nl - 1)],
            p.lnfw,
            &a.lnf_mean[..bt],
            &a.lnf_rstd[..bt],
            b,
            t,
            c,
        );

        for l in (0..nl).rev() {
            ops::residual_backward(
                &mut da.residual2[r_btc(l)],
                &mut da.fcproj[r_btc(l)],
                &da.residual3[r_btc(l)],
            );
            ops::matmul_backward(
                &mut da.fch_gelu[r_bt4c(l)],
                &mut dp.fcprojw[r_4cc(l)],
                Some(&mut dp.fcprojb[r_c(l)]),
                &da.fcproj[r_btc(l)],
                &a.fch_gelu[r_bt4c(l)],
                &p.fcprojw[r_4cc(l)],
                b,
                t,
                4 * c,
                c,
            );
            ops::gelu_backward(
                &mut da.fch[r_bt4c(l)],
                &a.fch[r_bt4c(l)],
                &da.fch_gelu[r_bt4c(l)],
            );
            ops::matmul_backward(
                &mut da.ln2[r_btc(l)],
                &mut dp.fcw[r_4cc(l)],
                Some(&mut dp.fcb[r_4c(l)]),
                &da.fch[r_bt4c(l)],
                &a.ln2[r_btc(l)],
                &p.fcw[r_4cc(l)],
                b,
                t,
                c,
                4 * c,
            );
            ops::layernorm_backward(
                &mut da.residual2[r_btc(l)],
                &mut dp.ln2w[r_c(l)],
                &mut dp.ln2b[r_c(l)],
                &da.ln2[r_btc(l)],
                &a.residual2[r_btc(l)],
                &p.ln2w[r_c(l)],
                &a.ln2_mean[r_bt(l)],
                &a.ln2_rstd[r_bt(l)],
                b,
                t,
                c,
            );
            // The residual stream gradient flows into the previous block's
            // output (or the encoder output for the first block).
            if l == 0 {
                ops::residual_backward(
                    &mut da.encoded[..btc],
                    &mut da.attproj[r_btc(l)],
                    &da.residual2[r_btc(l)],
                );
            } else {
                ops::residual_backward(
                    &mut da.residual3[r_btc(l - 1)],
                    &mut da.attproj[r_btc(l)],
                    &da.residual2[r_btc(l)],
                );
            }
            ops::matmul_backward(
                &mut da.atty[r_btc(l)],
                &mut dp.attprojw[r_cc(l)],
                Some(&mut dp.attprojb[r_c(l)]),
                &da.attproj[r_btc(l)],
                &a.atty[r_btc(l)],
                &p.attprojw[r_cc(l)],
                b,
                t,
                c,
                c,
            );
            ops::attention_backward(
                &mut da.qkv[r_bt3c(l)],
                &mut da.preatt[r_att(l)],
                &mut da.att[r_att(l)],
                &da.atty[r_btc(l)],
                &a.qkv[r_bt3c(l)],
                &a.att[r_att(l)],
                b,
                t,
                c,
                nh,
            );
            ops::matmul_backward(
                &mut da.ln1[r_btc(l)],
                &mut dp.qkvw[r_3cc(l)],
                Some(&mut dp.qkvb[r_3c(l)]),
                &da.qkv[r_bt3c(l)],
                &a.ln1[r_btc(l)],
                &p.qkvw[r_3cc(l)],
                b,
                t,
                c,
                3 * c,
            );
            let residual = if l == 0 {
                &a.encoded[..btc]
            } else {
                &a.residual3[r_btc(l - 1)]
            };
            if l == 0 {
                ops::layernorm_backward(
                    &mut da.encoded[..btc],
                    &mut dp.ln1w[r_c(l)],
                    &mut dp.ln1b[r_c(l)],
                    &da.ln1[r_btc(l)],
                    residual,
                    &p.ln1w[r_c(l)],
                    &a.ln1_mean[r_bt(l)],
                    &a.ln1_rstd[r_bt(l)],
                    b,
                    t,
                    c,
                );
            } else {
                ops::layernorm_backward(
                    &mut da.residual3[r_btc(l - 1)],
                    &mut dp.ln1w[r_c(l)],
                    &mut dp.ln1b[r_c(l)],
                    &da.ln1[r_btc(l)],
                    residual,
                    &p.ln1w[r_c(l)],
                    &a.ln1_mean[r_bt(l)],
                    &a.ln1_rstd[r_bt(l)],
                    b,
                    t,
                    c,
                );
            }
        }

        // Second tied-weight contribution lands in grads.wte here.
        ops::encoder_backward(
            &mut dp.wte[..],
            &mut dp.wpe[..],
            &da.encoded[..btc],
            &self.inputs[..bt],
            b,
            t,
            c,
        );
        Ok(())
    }

    /// One AdamW step over the whole parameter buffer.
    ///
    /// Optimizer moments are allocated zeroed on the first call.
    ///
    /// # Errors
    /// `StateViolation` if no `backward` has run yet.
    pub fn update(
        &mut self,
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
        weight_decay: f32,
    ) -> Result<()> {
        let grads = self.grads.as_ref().ok_or(ModelError::StateViolation(
            "update requires a preceding backward",
        ))?;
        let n_params = self.params.len();
        let opt = self.optimizer.get_or_insert_with(|| AdamW::new(n_params));
        opt.update(
            &mut self.params,
            grads,
            learning_rate,
            beta1,
            beta2,
            eps,
            weight_decay,
        );
        Ok(())
    }
}
