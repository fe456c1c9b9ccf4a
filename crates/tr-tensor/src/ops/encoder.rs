//! Token + position embedding lookup and its scatter-add backward.

/// Combine token and position embeddings: `out[b,t,:] = wte[inp[b,t],:] + wpe[t,:]`.
///
/// - `out`: output, shape (b, t, c)
/// - `inp`: token indices, shape (b, t)
/// - `wte`: token embedding table, shape (n_vocab, c)
/// - `wpe`: position embedding table, shape (max_seq_len, c); `t` must not
///   exceed `max_seq_len`
pub fn encoder_forward(
    out: &mut [f32],
    inp: &[i32],
    wte: &[f32],
    wpe: &[f32],
    b: usize,
    t: usize,
    c: usize,
) {
    debug_assert!(out.len() >= b * t * c);
    debug_assert!(inp.len() >= b * t);
    for bi in 0..b {
        for ti in 0..t {
            let bt = bi * t + ti;
            let ix = inp[bt] as usize;
            let out_bt = &mut out[bt * c..(bt + 1) * c];
            let wte_ix = &wte[ix * c..(ix + 1) * c];
            let wpe_t = &wpe[ti * c..(ti + 1) * c];
            for i in 0..c {
                out_bt[i] = wte_ix[i] + wpe_t[i];
            }
        }
    }
}

/// Scatter `dout` back into the embedding tables.
///
/// Adds `dout[b,t,:]` into row `inp[b,t]` of `dwte` and row `t` of `dwpe`.
/// Serial on purpose: several `(b,t)` positions usually hit the same `wte`
/// row, so a parallel version would race on the accumulation.
pub fn encoder_backward(
    dwte: &mut [f32],
    dwpe: &mut [f32],
    dout: &[f32],
    inp: &[i32],
    b: usize,
    t: usize,
    c: usize,
) {
    debug_assert!(dout.len() >= b * t * c);
    for bi in 0..b {
        for ti in 0..t {
            let bt = bi * t + ti;
            let ix = inp[bt] as usize;
            let dout_bt = &dout[bt * c..(bt + 1) * c];
            let dwte_ix = &mut dwte[ix * c..(ix + 1) * c];
            for i in 0..c {
                dwte_ix[i] += dout_bt[i];
            }
            let dwpe_t = &mut dwpe[ti * c..(ti + 1) * c];
            for i in 0..c {
                dwpe_t[i] += dout_bt[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_adds_token_and_position_rows() {
        // vocab 3, max seq 2, channels 2
        let wte = vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0];
        let wpe = vec![10.0, 20.0, 30.0, 40.0];
        let inp = vec![2, 1];
        let mut out = vec![0.0; 4];
        encoder_forward(&mut out, &inp, &wte, &wpe, 1, 2, 2);
        // t=0: wte[2] + wpe[0], t=1: wte[1] + wpe[1]
        assert_eq!(out, vec![13.0, 24.0, 31.0, 42.0]);
    }

    #[test]
    fn test_backward_accumulates_repeated_tokens() {
        let inp = vec![1, 1];
        let dout = vec![1.0, 2.0, 3.0, 4.0];
        let mut dwte = vec![0.0; 6];
        let mut dwpe = vec![0.0; 4];
        encoder_backward(&mut dwte, &mut dwpe, &dout, &inp, 1, 2, 2);
        // Token 1 appears at both positions: its row collects both grads.
        assert_eq!(dwte, vec![0.0, 0.0, 4.0, 6.0, 0.0, 0.0]);
        assert_eq!(dwpe, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_backward_accumulates_on_top_of_existing() {
        let inp = vec![0];
        let dout = vec![1.0, 1.0];
        let mut dwte = vec![5.0, 5.0];
        let mut dwpe = vec![5.0, 5.0];
        encoder_backward(&mut dwte, &mut dwpe, &dout, &inp, 1, 1, 2);
        assert_eq!(dwte, vec![6.0, 6.0]);
        assert_eq!(dwpe, vec![6.0, 6.0]);
    }
}
