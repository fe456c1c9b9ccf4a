//! `tr-sampler` - Deterministic RNG and token sampling strategies for
//! training-runtime.

pub mod rng;
pub mod sampler;

pub use rng::XorShiftRng;
pub use sampler::{ArgmaxSampler, MultinomialSampler, Sampler};
