//! `tr-model` - GPT-2 checkpoint loading, tensor plans, training engine, and
//! token data loader for training-runtime.
//!
//! The central type is [`Gpt2`]: it owns the flat parameter buffer loaded
//! from a checkpoint and drives `forward` / `zero_grad` / `backward` /
//! `update` over it. [`ParamPlan`] and [`ActPlan`] describe how the sixteen
//! parameter tensors and twenty-three activation tensors pack into their two
//! contiguous allocations.

pub mod adamw;
pub mod checkpoint;
pub mod config;
pub mod dataloader;
pub mod error;
pub mod gpt2;
pub mod plan;

pub use adamw::AdamW;
pub use config::GptConfig;
pub use dataloader::DataLoader;
pub use error::{ModelError, Result};
pub use gpt2::Gpt2;
pub use plan::{ActPlan, ParamPlan};
