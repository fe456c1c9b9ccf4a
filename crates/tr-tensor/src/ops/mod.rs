//! CPU kernels for the transformer forward and backward passes.
//!
//! Conventions shared by every kernel:
//! - Buffers are flat row-major `f32` slices; shapes arrive as explicit
//!   integer arguments (`b` batch, `t` sequence, `c` channels, ...).
//! - Forward kernels overwrite their outputs.
//! - Backward kernels accumulate into gradient slices with `+=`; callers
//!   zero gradients once per step, not per kernel.
//! - Kernels never allocate.

pub mod attention;
pub mod crossentropy;
pub mod encoder;
pub mod gelu;
pub mod layernorm;
pub mod matmul;
pub mod residual;
pub mod softmax;

pub use attention::{attention_backward, attention_forward};
pub use crossentropy::{crossentropy_forward, crossentropy_softmax_backward};
pub use encoder::{encoder_backward, encoder_forward};
pub use gelu::{gelu_backward, gelu_forward};
pub use layernorm::{layernorm_backward, layernorm_forward};
pub use matmul::{matmul_backward, matmul_forward};
pub use residual::{residual_backward, residual_forward};
pub use softmax::softmax_forward;
