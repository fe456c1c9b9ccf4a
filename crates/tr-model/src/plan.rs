//! Memory plans for the two flat allocations of the engine.
//!
//! `ParamPlan` lays out the sixteen parameter tensors; `ActPlan` lays out the
//! twenty-three activation tensors for a given `(B, T)`. Each plan is a table
//! of `TensorView`s packed back-to-back in a fixed order, plus splitters that
//! carve a full buffer into per-tensor slices. The same plan indexes a buffer
//! and its gradient (or optimizer-moment) twin, since those share one layout.

use tr_tensor::{Cursor, TensorView};

use crate::config::GptConfig;

/// Offsets and shapes of the sixteen parameter tensors, in their fixed
/// concatenation order.
#[derive(Debug, Clone)]
pub struct ParamPlan {
    /// Token embedding, (V, C); also the tied logits weight.
    pub wte: TensorView,
    /// Position embedding, (maxT, C).
    pub wpe: TensorView,
    /// Pre-attention LayerNorm scale, (L, C).
    pub ln1w: TensorView,
    /// Pre-attention LayerNorm shift, (L, C).
    pub ln1b: TensorView,
    /// Fused Q/K/V projection, (L, 3C, C).
    pub qkvw: TensorView,
    /// Fused Q/K/V bias, (L, 3C).
    pub qkvb: TensorView,
    /// Attention output projection, (L, C, C).
    pub attprojw: TensorView,
    /// Attention output bias, (L, C).
    pub attprojb: TensorView,
    /// Pre-MLP LayerNorm scale, (L, C).
    pub ln2w: TensorView,
    /// Pre-MLP LayerNorm shift, (L, C).
    pub ln2b: TensorView,
    /// MLP up-projection, (L, 4C, C).
    pub fcw: TensorView,
    /// MLP up-projection bias, (L, 4C).
    pub fcb: TensorView,
    /// MLP down-projection, (L, C, 4C).
    pub fcprojw: TensorView,
    /// MLP down-projection bias, (L, C).
    pub fcprojb: TensorView,
    /// Final LayerNorm scale, (C).
    pub lnfw: TensorView,
    /// Final LayerNorm shift, (C).
    pub lnfb: TensorView,
    total: usize,
}

impl ParamPlan {
    pub fn new(cfg: &GptConfig) -> ParamPlan {
        let (v, max_t, l, c) = (cfg.n_vocab, cfg.max_seq_len, cfg.n_layers, cfg.n_embd);
        let mut cur = Cursor::new();
        let wte = cur.take(&[v, c]);
        let wpe = cur.take(&[max_t, c]);
        let ln1w = cur.take(&[l, c]);
        let ln1b = cur.take(&[l, c]);
        let qkvw = cur.take(&[l, 3 * c, c]);
        let qkvb = cur.take(&[l, 3 * c]);
        let attprojw = cur.take(&[l, c, c]);
        let attprojb = cur.take(&[l, c]);
        let ln2w = cur.take(&[l, c]);
        let ln2b = cur.take(&[l, c]);
        let fcw = cur.take(&[l, 4 * c, c]);
        let fcb = cur.take(&[l, 4 * c]);
        let fcprojw = cur.take(&[l, c, 4 * c]);
        let fcprojb = cur.take(&[l, c]);
        let lnfw = cur.take(&[c]);
        let lnfb = cur.take(&[c]);
        ParamPlan {
            wte,
            wpe,
            ln1w,
            ln1b,
            qkvw,
            qkvb,
            attprojw,
            attprojb,
            ln2w,
            ln2b,
            fcw,
            fcb,
            fcprojw,
            fcprojb,
            lnfw,
            lnfb,
            total: cur.total(),
        }
    }

    /// Total number of parameters (the required buffer length).
    pub fn total(&self) -> usize {
        self.total
    }

    /// Borrow every tensor out of a shared buffer.
    pub fn split<'a>(&self, buf: &'a [f32]) -> ParamSlices<'a> {
        debug_assert_eq!(buf.len(), self.total);
        ParamSlices {
            wte: &buf[self.wte.range()],
            wpe: &buf[self.wpe.range()],
            ln1w: &buf[self.ln1w.range()],
            ln1b: &buf[self.ln1b.range()],
            qkvw: &buf[self.qkvw.range()],
            qkvb: &buf[self.qkvb.range()],
            attprojw: &buf[self.attprojw.range()],
            attprojb: &buf[self.attprojb.range()],
            ln2w: &buf[self.ln2w.range()],
            ln2b: &buf[self.ln2b.range()],
            fcw: &buf[self.fcw.range()],
            fcb: &buf[self.fcb.range()],
            fcprojw: &buf[self.fcprojw.range()],
            fcprojb: &buf[self.fcprojb.range()],
            lnfw: &buf[self.lnfw.range()],
            lnfb: &buf[self.lnfb.range()],
        }
    }

    /// Carve a mutable buffer into per-tensor slices.
    ///
    /// Views are packed contiguously in declaration order, so the buffer can
    /// be partitioned with successive `split_at_mut`.
    pub fn split_mut<'a>(&self, buf: &'a mut [f32]) -> ParamSlicesMut<'a> {
        debug_assert_eq!(buf.len(), self.total);
        let (wte, rest) = buf.split_at_mut(self.wte.len());
        let (wpe, rest) = rest.split_at_mut(self.wpe.len());
        let (ln1w, rest) = rest.split_at_mut(self.ln1w.len());
        let (ln1b, rest) = rest.split_at_mut(self.ln1b.len());
        let (qkvw, rest) = rest.split_at_mut(self.qkvw.len());
        let (qkvb, rest) = rest.split_at_mut(self.qkvb.len());
        let (attprojw, rest) = rest.split_at_mut(self.attprojw.len());
        let (attprojb, rest) = rest.split_at_mut(self.attprojb.len());
        let (ln2w, rest) = rest.split_at_mut(self.ln2w.len());
        let (ln2b, rest) = rest.split_at_mut(self.ln2b.len());
        let (fcw, rest) = rest.split_at_mut(self.fcw.len());
        let (fcb, rest) = rest.split_at_mut(self.fcb.len());
        let (fcprojw, rest) = rest.split_at_mut(self.fcprojw.len());
        let (fcprojb, rest) = rest.split_at_mut(self.fcprojb.len());
        let (lnfw, lnfb) = rest.split_at_mut(self.lnfw.len());
        ParamSlicesMut {
            wte,
            wpe,
            ln1w,
            ln1b,
            qkvw,
            qkvb,
            attprojw,
            attprojb,
            ln2w,
            ln2b,
            fcw,
            fcb,
            fcprojw,
            fcprojb,
            lnfw,
            lnfb,
        }
    }
}

/// Shared per-tensor slices of a parameter-shaped buffer.
pub struct ParamSlices<'a> {
    pub wte: &'a [f32],
    pub wpe: &'a [f32],
    pub ln1w: &'a [f32],
    pub ln1b: &'a [f32],
    pub qkvw: &'a [f32],
    pub qkvb: &'a [f32],
    pub attprojw: &'a [f32],
    pub attprojb: &'a [f32],
    pub ln2w: &'a [f32],
    pub ln2b: &'a [f32],
    pub fcw: &'a [f32],
    pub fcb: &'a [f32],
    pub fcprojw: &'a [f32],
    pub fcprojb: &'a [f32],
    pub lnfw: &'a [f32],
    pub lnfb: &'a [f32],
}

/// Mutable per-tensor slices of a parameter-shaped buffer.
pub struct ParamSlicesMut<'a> {
    pub wte: &'a mut [f32],
    pub wpe: &'a mut [f32],
    pub ln1w: &'a mut [f32],
    pub ln1b: &'a mut [f32],
    pub qkvw: &'a mut [f32],
    pub qkvb: &'a mut [f32],
    pub attprojw: &'a mut [f32],
    pub attprojb: &'a mut [f32],
    pub ln2w: &'a mut [f32],
    pub ln2b: &'a mut [f32],
    pub fcw: &'a mut [f32],
    pub fcb: &'a mut [f32],
    pub fcprojw: &'a mut [f32],
    pub fcprojb: &'a mut [f32],
    pub lnfw: &'a mut [f32],
    pub lnfb: &'a mut [f32],
}

/// Offsets and shapes of the twenty-three activation tensors for a fixed
/// allocation shape `(B, T)`.
///
/// Per-layer tensors carry a leading `L` dimension; a layer's slab is found
/// by stepping `layer * per_layer_stride` into the tensor's slice. Forwards
/// with a smaller batch shape use the dense prefix of each slab.
#[derive(Debug, Clone)]
pub struct ActPlan {
    /// Allocation batch size.
    pub batch_size: usize,
    /// Allocation sequence length.
    pub seq_len: usize,
    /// Encoder output, (B, T, C).
    pub encoded: TensorView,
    /// Pre-attention LayerNorm output, (L, B, T, C).
    pub ln1: TensorView,
    /// Cached LayerNorm means, (L, B, T).
    pub ln1_mean: TensorView,
    /// Cached LayerNorm reciprocal stddevs, (L, B, T).
    pub ln1_rstd: TensorView,
    /// Fused Q/K/V projections, (L, B, T, 3C).
    pub qkv: TensorView,
    /// Attention output (pre-projection), (L, B, T, C).
    pub atty: TensorView,
    /// Raw attention scores, (L, B, NH, T, T).
    pub preatt: TensorView,
    /// Softmaxed attention, (L, B, NH, T, T).
    pub att: TensorView,
    /// Attention projection output, (L, B, T, C).
    pub attproj: TensorView,
    /// First residual sum, (L, B, T, C).
    pub residual2: TensorView,
    /// Pre-MLP LayerNorm output, (L, B, T, C).
    pub ln2: TensorView,
    pub ln2_mean: TensorView,
    pub ln2_rstd: TensorView,
    /// MLP hidden pre-activation, (L, B, T, 4C).
    pub fch: TensorView,
    /// MLP hidden post-GELU, (L, B, T, 4C).
    pub fch_gelu: TensorView,
    /// MLP down-projection output, (L, B, T, C).
    pub fcproj: TensorView,
    /// Second residual sum (the block output), (L, B, T, C).
    pub residual3: TensorView,
    /// Final LayerNorm output, (B, T, C).
    pub lnf: TensorView,
    pub lnf_mean: TensorView,
    pub lnf_rstd: TensorView,
    /// Logits, (B, T, V).
    pub logits: TensorView,
    /// Softmax probabilities, (B, T, V).
    pub probs: TensorView,
    /// Per-position cross-entropy losses, (B, T).
    pub losses: TensorView,
    total: usize,
}

impl ActPlan {
    pub fn new(cfg: &GptConfig, batch_size: usize, seq_len: usize) -> ActPlan {
        let (b, t) = (batch_size, seq_len);
        let (v, l, nh, c) = (cfg.n_vocab, cfg.n_layers, cfg.n_heads, cfg.n_embd);
        let mut cur = Cursor::new();
        let encoded = cur.take(&[b, t, c]);
        let ln1 = cur.take(&[l, b, t, c]);
        let ln1_mean = cur.take(&[l, b, t]);
        let ln1_rstd = cur.take(&[l, b, t]);
        let qkv = cur.take(&[l, b, t, 3 * c]);
        let atty = cur.take(&[l, b, t, c]);
        let preatt = cur.take(&[l, b, nh, t, t]);
        let att = cur.take(&[l, b, nh, t, t]);
        let attproj = cur.take(&[l, b, t, c]);
        let residual2 = cur.take(&[l, b, t, c]);
        let ln2 = cur.take(&[l, b, t, c]);
        let ln2_mean = cur.take(&[l, b, t]);
        let ln2_rstd = cur.take(&[l, b, t]);
        let fch = cur.take(&[l, b, t, 4 * c]);
        let fch_gelu = cur.take(&[l, b, t, 4 * c]);
        let fcproj = cur.take(&[l, b, t, c]);
        let residual3 = cur.take(&[l, b, t, c]);
        let lnf = cur.take(&[b, t, c]);
        let lnf_mean = cur.take(&[b, t]);
        let lnf_rstd = cur.take(&[b, t]);
        let logits = cur.take(&[b, t, v]);
        let probs = cur.take(&[b, t, v]);
        let losses = cur.take(&[b, t]);
        ActPlan {
            batch_size,
            seq_len,
            encoded,
            ln1,
            ln1_mean,
            ln1_rstd,
            qkv,
            atty,
            preatt,
            att,
            attproj,
            residual2,
            ln2,
            ln2_mean,
            ln2_rstd,
            fch,
            fch_gelu,
            fcproj,
            residual3,
            lnf,
            lnf_mean,
            lnf_rstd,
            logits,
            probs,
            losses,
            total: cur.total(),
        }
    }

    /// Total number of activation floats (the required buffer length).
    pub fn total(&self) -> usize {
        self.total
    }

    /// Borrow every tensor out of a shared buffer.
    pub fn split<'a>(&self, buf: &'a [f32]) -> ActSlices<'a> {
        debug_assert_eq!(buf.len(), self.total);
        ActSlices {
            encoded: &buf[self.encoded.range()],
            ln1: &buf[self.ln1.range()],
            ln1_mean: &buf[self.ln1_mean.range()],
            ln1_rstd: &buf[self.ln1_rstd.range()],
            qkv: &buf[self.qkv.range()],
            atty: &buf[self.atty.range()],
            preatt: &buf[self.preatt.range()],
            att: &buf[self.att.range()],
            attproj: &buf[self.attproj.range()],
            residual2: &buf[self.residual2.range()],
            ln2: &buf[self.ln2.range()],
            ln2_mean: &buf[self.ln2_mean.range()],
            ln2_rstd: &buf[self.ln2_rstd.range()],
            fch: &buf[self.fch.range()],
            fch_gelu: &buf[self.fch_gelu.range()],
            fcproj: &buf[self.fcproj.range()],
            residual3: &buf[self.residual3.range()],
            lnf: &buf[self.lnf.range()],
            lnf_mean: &buf[self.lnf_mean.range()],
            lnf_rstd: &buf[self.lnf_rstd.range()],
            logits: &buf[self.logits.range()],
            probs: &buf[self.probs.range()],
            losses: &buf[self.losses.range()],
        }
    }

    /// Carve a mutable buffer into per-tensor slices (see
    /// [`ParamPlan::split_mut`]).
    pub fn split_mut<'a>(&self, buf: &'a mut [f32]) -> ActSlicesMut<'a> {
        debug_assert_eq!(buf.len(), self.total);
        let (encoded, rest) = buf.split_at_mut(self.encoded.len());
        let (ln1, rest) = rest.split_at_mut(self.ln1.len());
        let (ln1_mean, rest) = rest.split_at_mut(self.ln1_mean.len());
        let (ln1_rstd, rest) = rest.split_at_mut(self.ln1_rstd.len());
        let (qkv, rest) = rest.split_at_mut(self.qkv.len());
        let (atty, rest) = rest.split_at_mut(self.atty.len());
        let (preatt, rest) = rest.split_at_mut(self.preatt.len());
        let (att, rest) = rest.split_at_mut(self.att.len());
        let (attproj, rest) = rest.split_at_mut(self.attproj.len());
        let (residual2, rest) = rest.split_at_mut(self.residual2.len());
        let (ln2, rest) = rest.split_at_mut(self.ln2.len());
        let (ln2_mean, rest) = rest.split_at_mut(self.ln2_mean.len());
        let (ln2_rstd, rest) = rest.split_at_mut(self.ln2_rstd.len());
        let (fch, rest) = rest.split_at_mut(self.fch.len());
        let (fch_gelu, rest) = rest.split_at_mut(self.fch_gelu.len());
        let (fcproj, rest) = rest.split_at_mut(self.fcproj.len());
        let (residual3, rest) = rest.split_at_mut(self.residual3.len());
        let (lnf, rest) = rest.split_at_mut(self.lnf.len());
        let (lnf_mean, rest) = rest.split_at_mut(self.lnf_mean.len());
        let (lnf_rstd, rest) = rest.split_at_mut(self.lnf_rstd.len());
        let (logits, rest) = rest.split_at_mut(self.logits.len());
        let (probs, losses) = rest.split_at_mut(self.probs.len());
        ActSlicesMut {
            encoded,
            ln1,
            ln1_mean,
            ln1_rstd,
            qkv,
            atty,
            preatt,
            att,
            attproj,
            residual2,
            ln2,
            ln2_mean,
            ln2_rstd,
            fch,
            fch_gelu,
            fcproj,
            residual3,
            lnf,
            lnf_mean,
            lnf_rstd,
            logits,
            probs,
            losses,
        }
    }
}

/// Shared per-tensor slices of an activation-shaped buffer.
pub struct ActSlices<'a> {
    pub encoded: &'a [f32],
    pub ln1: &'a [f32],
    pub ln1_mean: &'a [f32],
    pub ln1_rstd: &'a [f32],
    pub qkv: &'a [f32],
    pub atty: &'a [f32],
    pub preatt: &'a [f32],
    pub att: &'a [f32],
    pub attproj: &'a [f32],
    pub residual2: &'a [f32],
    pub ln2: &'a [f32],
    pub ln2_mean: &'a [f32],
    pub ln2_rstd: &'a [f32],
    pub fch: &'a [f32],
    pub fch_gelu: &'a [f32],
    pub fcproj: &'a [f32],
    pub residual3: &'a [f32],
    pub lnf: &'a [f32],
    pub lnf_mean: &'a [f32],
    pub lnf_rstd: &'a [f32],
    pub logits: &'a [f32],
    pub probs: &'a [f32],
    pub losses: &'a [f32],
}

/// Mutable per-tensor slices of an activation-shaped buffer.
pub struct ActSlicesMut<'a> {
    pub encoded: &'a mut [f32],
    pub ln1: &'a mut [f32],
    pub ln1_mean: &'a mut [f32],
    pub ln1_rstd: &'a mut [f32],
    pub qkv: &'a mut [f32],
    pub atty: &'a mut [f32],
    pub preatt: &'a mut [f32],
    pub att: &'a mut [f32],
    pub attproj: &'a mut [f32],
    pub residual2: &'a mut [f32],
    pub ln2: &'a mut [f32],
    pub ln2_mean: &'a mut [f32],
    pub ln2_rstd: &'a mut [f32],
    pub fch: &'a mut [f32],
    pub fch_gelu: &'a mut [f32],
    pub fcproj: &'a mut [f32],
    pub residual3: &'a mut [f32],
    pub lnf: &'a mut [f32],
    pub lnf_mean: &'a mut [f32],
    pub lnf_rstd: &'a mut [f32],
    pub logits: &'a mut [f32],
    pub probs: &'a mut [f32],
    pub losses: &'a mut [f32],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> GptConfig {
        GptConfig::new(8, 16, 2, 2, 8).unwrap()
    }

    #[test]
    fn test_param_plan_total_matches_closed_form() {
        let cfg = tiny_config();
        let (v, max_t, l, c) = (cfg.n_vocab, cfg.max_seq_len, cfg.n_layers, cfg.n_embd);
        let expected = v * c
            + max_t * c
            + l * (2 * c                      // ln1
                + 3 * c * c + 3 * c           // qkv
                + c * c + c                   // attproj
                + 2 * c                       // ln2
                + 4 * c * c + 4 * c           // fc
                + 4 * c * c + c)              // fcproj
            + 2 * c; // lnf
        let plan = ParamPlan::new(&cfg);
        assert_eq!(plan.total(), expected);
    }

    #[test]
    fn test_param_plan_tiles_the_buffer() {
        let cfg = tiny_config();
        let plan = ParamPlan::new(&cfg);
        let views = [
            &plan.wte,
            &plan.wpe,
            &plan.ln1w,
            &plan.ln1b,
            &plan.qkvw,
            &plan.qkvb,
            &plan.attprojw,
            &plan.attprojb,
            &plan.ln2w,
            &plan.ln2b,
            &plan.fcw,
            &plan.fcb,
            &plan.fcprojw,
            &plan.fcprojb,
            &plan.lnfw,
            &plan.lnfb,
        ];
        let mut expected_offset = 0;
        for view in views {
            assert_eq!(view.offset(), expected_offset);
            expected_offset += view.len();
        }
        assert_eq!(expected_offset, plan.total());
    }

    #[test]
    fn test_act_plan_tiles_the_buffer() {
        let cfg = tiny_config();
        let plan = ActPlan::new(&cfg, 2, 4);
        let views = [
            &plan.encoded,
            &plan.ln1,
            &plan.ln1_mean,
            &plan.ln1_rstd,
            &plan.qkv,
            &plan.atty,
            &plan.preatt,
            &plan.att,
            &plan.attproj,
            &plan.residual2,
            &plan.ln2,
            &plan.ln2_mean,
            &plan.ln2_rstd,
            &plan.fch,
            &plan.fch_gelu,
            &plan.fcproj,
            &plan.residual3,
            &plan.lnf,
            &plan.lnf_mean,
            &plan.lnf_rstd,
            &plan.logits,
            &plan.probs,
            &plan.losses,
        ];
        let mut expected_offset = 0;
        for view in views {
            assert_eq!(view.offset(), expected_offset);
            expected_offset += view.len();
        }
        assert_eq!(expected_offset, plan.total());
    }

    #[test]
    fn test_split_mut_slices_have_plan_lengths() {
        let cfg = tiny_config();
        let plan = ParamPlan::new(&cfg);
        let mut buf = vec![0.0f32; plan.total()];
        let s = plan.split_mut(&mut buf);
        assert_eq!(s.wte.len(), cfg.n_vocab * cfg.n_embd);
        assert_eq!(s.qkvw.len(), cfg.n_layers * 3 * cfg.n_embd * cfg.n_embd);
        assert_eq!(s.lnfb.len(), cfg.n_embd);
    }

    #[test]
    fn test_gpt2_124m_parameter_count() {
        let cfg = GptConfig::new(1024, 50257, 12, 12, 768).unwrap();
        let plan = ParamPlan::new(&cfg);
        // The canonical GPT-2 124M float count.
        assert_eq!(plan.total(), 124_439_808);
    }
}
