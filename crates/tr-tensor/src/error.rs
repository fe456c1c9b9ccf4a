use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("view [{offset}, {offset}+{len}) exceeds buffer of length {buf_len}")]
    ViewOutOfBounds {
        offset: usize,
        len: usize,
        buf_len: usize,
    },
}

pub type Result<T> = std::result::Result<T, TensorError>;
