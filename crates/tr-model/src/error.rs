use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid checkpoint magic: expected 20240326, got {found}")]
    InvalidMagic { found: i32 },
    #[error("unsupported checkpoint version: {found}")]
    UnsupportedVersion { found: i32 },
    #[error("bad checkpoint size: expected {expected} bytes, got {got}")]
    BadPayloadSize { expected: usize, got: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(
        "batch shape B={batch} T={seq} exceeds the allocated B={max_batch} T={max_seq}"
    )]
    ShapeOverflow {
        batch: usize,
        seq: usize,
        max_batch: usize,
        max_seq: usize,
    },
    #[error("state violation: {0}")]
    StateViolation(&'static str),
    #[error("token file too small: need {needed} tokens for one batch, file has {got}")]
    TokenFileTooSmall { needed: usize, got: usize },
    #[error("token id {token} out of range for vocabulary of size {n_vocab}")]
    InvalidToken { token: i32, n_vocab: usize },
    #[error("tensor error: {0}")]
    Tensor(#[from] tr_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
