use crate::error::{ModelError, Result};

/// Hyperparameters of a GPT-2 style model, immutable after checkpoint load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptConfig {
    /// Maximum supported sequence length (position embedding rows).
    pub max_seq_len: usize,
    /// Vocabulary size (token embedding rows and logit width).
    pub n_vocab: usize,
    /// Number of transformer blocks.
    pub n_layers: usize,
    /// Number of attention heads per block.
    pub n_heads: usize,
    /// Model width / channel count.
    pub n_embd: usize,
}

impl GptConfig {
    /// Create and validate a configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if any dimension is zero or `n_heads` does not
    /// divide `n_embd`.
    pub fn new(
        max_seq_len: usize,
        n_vocab: usize,
        n_layers: usize,
        n_heads: usize,
        n_embd: usize,
    ) -> Result<GptConfig> {
        if max_seq_len == 0 || n_vocab == 0 || n_layers == 0 || n_heads == 0 || n_embd == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "all dimensions must be positive: maxT={} V={} L={} NH={} C={}",
                max_seq_len, n_vocab, n_layers, n_heads, n_embd
            )));
        }
        if n_embd % n_heads != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "n_heads={} must divide n_embd={}",
                n_heads, n_embd
            )));
        }
        Ok(GptConfig {
            max_seq_len,
            n_vocab,
            n_layers,
            n_heads,
            n_embd,
        })
    }

    /// Per-head channel count, `n_embd / n_heads`.
    pub fn head_dim(&self) -> usize {
        self.n_embd / self.n_heads
    }
}
