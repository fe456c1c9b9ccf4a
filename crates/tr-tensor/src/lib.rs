//! `tr-tensor` - Flat-buffer tensor views and CPU training kernels for
//! training-runtime.
//!
//! This crate provides:
//! - `TensorView` descriptors (and the `Cursor` that packs them) for carving
//!   named tensors out of a single contiguous allocation
//! - The forward/backward kernel pairs of a GPT-2 style transformer
//!   (encoder, layernorm, matmul, causal attention, GELU, residual, softmax,
//!   cross-entropy)
//!
//! Kernels operate on plain `f32` slices with explicit shape arguments and
//! never allocate. Every backward kernel accumulates into its gradient
//! arguments with `+=`; zeroing is the caller's job.

pub mod error;
pub mod ops;
pub mod view;

// Re-export primary types at the crate root for convenience.
pub use error::{Result, TensorError};
pub use view::{Cursor, TensorView};
