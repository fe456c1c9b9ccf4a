//! Cross-entropy over softmax probabilities, and the fused
//! softmax+cross-entropy backward that emits logit gradients directly.

/// `losses[b,t] = -ln(probs[b,t, targets[b,t]])`.
pub fn crossentropy_forward(
    losses: &mut [f32],
    probs: &[f32],
    targets: &[i32],
    b: usize,
    t: usize,
    v: usize,
) {
    debug_assert!(losses.len() >= b * t);
    debug_assert!(targets.len() >= b * t);
    for bt in 0..b * t {
        let probs_bt = &probs[bt * v..(bt + 1) * v];
        let ix = targets[bt] as usize;
        losses[bt] = -probs_bt[ix].ln();
    }
}

/// Fused backward through softmax and cross-entropy:
/// `dlogits[b,t,i] += (probs[b,t,i] - 1[i == targets[b,t]]) * dlosses[b,t]`.
///
/// `dlosses` stays a parameter (rather than hard-coding the driver's uniform
/// `1/(B*T)` seed) so per-position loss weighting remains possible.
pub fn crossentropy_softmax_backward(
    dlogits: &mut [f32],
    dlosses: &[f32],
    probs: &[f32],
    targets: &[i32],
    b: usize,
    t: usize,
    v: usize,
) {
    debug_assert!(dlogits.len() >= b * t * v);
    for bt in 0..b * t {
        let dlogits_bt = &mut dlogits[bt * v..(bt + 1) * v];
        let probs_bt = &probs[bt * v..(bt + 1) * v];
        let dloss = dlosses[bt];
        let ix = targets[bt] as usize;
        for i in 0..v {
            let indicator = if i == ix { 1.0 } else { 0.0 };
            dlogits_bt[i] += (probs_bt[i] - indicator) * dloss;
        }
    }
}
