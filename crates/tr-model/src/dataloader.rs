//! Streaming loader for flat binary token files.
//!
//! A token file is a flat sequence of little-endian i32 token ids. Each batch
//! reads `B*T + 1` tokens at the cursor: the first `B*T` become the inputs,
//! the same window shifted by one becomes the targets (teacher forcing). The
//! cursor advances by `B*T` tokens per batch and wraps to the start of the
//! file before a read would overrun EOF.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{ModelError, Result};

pub struct DataLoader {
    mmap: Mmap,
    batch_size: usize,
    seq_len: usize,
    /// Cursor into the file, in tokens.
    cursor: usize,
    num_tokens: usize,
    inputs: Vec<i32>,
    targets: Vec<i32>,
}

impl DataLoader {
    /// Open a token file for `(batch_size, seq_len)` batches.
    ///
    /// # Errors
    /// Returns `TokenFileTooSmall` if the file cannot serve a single batch
    /// (fewer than `B*T + 1` tokens).
    pub fn open(path: &Path, batch_size: usize, seq_len: usize) -> Result<DataLoader> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let num_tokens = mmap.len() / 4;
        let needed = batch_size * seq_len + 1;
        if num_tokens < needed {
            return Err(ModelError::TokenFileTooSmall {
                needed,
                got: num_tokens,
            });
        }

        log::info!(
            "opened token file {}: {} tokens, {} batches of B={} T={}",
            path.display(),
            num_tokens,
            num_tokens / (batch_size * seq_len),
            batch_size,
            seq_len
        );

        Ok(DataLoader {
            mmap,
            batch_size,
            seq_len,
            cursor: 0,
            num_tokens,
            inputs: vec![0; batch_size * seq_len],
            targets: vec![0; batch_size * seq_len],
        })
    }

    /// Number of full batches per pass over the file.
    pub fn num_batches(&self) -> usize {
        self.num_tokens / (self.batch_size * self.seq_len)
    }

    /// Rewind the cursor to the start of the file.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Read the next `(inputs, targets)` pair, wrapping at EOF.
    pub fn next_batch(&mut self) -> (&[i32], &[i32]) {
        let n = self.batch_size * self.seq_len;
        if self.cursor + n + 1 > self.num_tokens {
            self.cursor = 0;
        }
        for i in 0..n {
            self.inputs[i] = self.token_at(self.cursor + i);
            self.targets[i] = self.token_at(self.cursor + i + 1);
        }
        self.cursor += n;
        (&self.inputs, &self.targets)
    }

    fn token_at(&self, idx: usize) -> i32 {
        let b = &self.mmap[idx * 4..idx * 4 + 4];
        i32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }
}
