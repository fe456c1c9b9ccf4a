//! Batched matmul against a row-major (OC, C) weight. The hot loop of the
//! engine; both directions parallelize with rayon over disjoint output rows.

use rayon::prelude::*;

/// `out[b,t,o] = sum_i inp[b,t,i] * weight[o,i] (+ bias[o])`.
///
/// - `inp`: shape (b, t, c)
/// - `weight`: shape (oc, c); row `o` holds the weights of output channel `o`
/// - `bias`: optional, shape (oc)
/// - `out`: shape (b, t, oc)
///
/// Parallel over the `(b, t)` output rows.
pub fn matmul_forward(
    out: &mut [f32],
    inp: &[f32],
    weight: &[f32],
    bias: Option<&[f32]>,
    b: usize,
    t: usize,
    c: usize,
    oc: usize,
) {
    debug_assert!(out.len() >= b * t * oc);
    debug_assert!(inp.len() >= b * t * c);
    debug_assert!(weight.len() >= oc * c);
    out[..b * t * oc]
        .par_chunks_mut(oc)
        .enumerate()
        .for_each(|(bt, out_bt)| {
            let inp_bt = &inp[bt * c..(bt + 1) * c];
            for o in 0..oc {
                let wrow = &weight[o * c..(o + 1) * c];
                let mut val = match bias {
                    Some(bias) => bias[o],
                    None => 0.0,
                };
                for i in 0..c {
                    val += inp_bt[i] * wrow[i];
                }
                out_bt[o] = val;
            }
        });
}

/// Backward of `matmul_forward`, accumulating into `dinp`, `dweight`, `dbias`.
///
/// Runs as two separate parallel regions:
/// 1. `dinp[b,t,:] += sum_o dout[b,t,o] * weight[o,:]`, over `(b, t)` rows.
/// 2. `dweight[o,:] += sum_bt dout[b,t,o] * inp[b,t,:]` and
///    `dbias[o] += sum_bt dout[b,t,o]`, over output channels.
///
/// The split is required: a single fused loop over `(b, t)` would have every
/// thread accumulating into the same `dweight` rows.
pub fn matmul_backward(
    dinp: &mut [f32],
    dweight: &mut [f32],
    mut dbias: Option<&mut [f32]>,
    dout: &[f32],
    inp: &[f32],
    weight: &[f32],
    b: usize,
    t: usize,
    c: usize,
    oc: usize,
) {
    debug_assert!(dinp.len() >= b * t * c);
    debug_assert!(dweight.len() >= oc * c);
    debug_assert!(dout.len() >= b * t * oc);

    // Pass 1: input gradients, disjoint per (b, t) row.
    dinp[..b * t * c]
        .par_chunks_mut(c)
        .enumerate()
        .for_each(|(bt, dinp_bt)| {
            let dout_bt = &dout[bt * oc..(bt + 1) * oc];
            for o in 0..oc {
                let wrow = &weight[o * c..(o + 1) * c];
                let d = dout_bt[o];
                for i in 0..c {
                    dinp_bt[i] += wrow[i] * d;
                }
            }
        });

    // Pass 2: weight gradients, disjoint per output channel row.
    dweight[..oc * c]
        .par_chunks_mut(c)
        .enumerate()
        .for_each(|(o, dwrow)| {
            for bt in 0..b * t {
                let d = dout[bt * oc + o];
                let inp_bt = &inp[bt * c..(bt + 1) * c];
                for i in 0..c {
                    dwrow[i] += inp_bt[i] * d;
                }
            }
        });

    if let Some(dbias) = dbias.as_deref_mut() {
        dbias[..oc]
            .par_iter_mut()
            .enumerate()
            .for_each(|(o, dbias_o)| {
                for bt in 0..b * t {
                    *dbias_o += dout[bt * oc + o];
                }
            });
    }
}
