//! Checkpoint file I/O.
//!
//! Format (little-endian): a fixed header of 256 signed 32-bit integers —
//! magic `20240326`, version `1`, then `maxT, V, L, NH, C` — followed by the
//! full parameter buffer as f32 values in the `ParamPlan` concatenation
//! order, each tensor in its natural row-major flattening. The remaining
//! header entries are reserved and ignored on read, zeroed on write.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::config::GptConfig;
use crate::error::{ModelError, Result};
use crate::plan::ParamPlan;

/// Checkpoint magic number.
pub const CHECKPOINT_MAGIC: i32 = 20240326;
/// Supported checkpoint version.
pub const CHECKPOINT_VERSION: i32 = 1;
/// Number of i32 entries in the header.
pub const HEADER_LEN: usize = 256;

/// Load a checkpoint: parse and validate the header, then copy the parameter
/// payload into an owned buffer.
///
/// The file is memory-mapped for the duration of the copy; the returned
/// buffer is owned so the caller can train in place.
pub fn load(path: &Path) -> Result<(GptConfig, Vec<f32>)> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    let header_bytes = HEADER_LEN * 4;
    if mmap.len() < header_bytes {
        return Err(ModelError::BadPayloadSize {
            expected: header_bytes,
            got: mmap.len(),
        });
    }

    let mut header = [0i32; HEADER_LEN];
    for (i, chunk) in mmap[..header_bytes].chunks_exact(4).enumerate() {
        header[i] = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    if header[0] != CHECKPOINT_MAGIC {
        return Err(ModelError::InvalidMagic { found: header[0] });
    }
    if header[1] != CHECKPOINT_VERSION {
        return Err(ModelError::UnsupportedVersion { found: header[1] });
    }

    let config = GptConfig::new(
        header[2] as usize,
        header[3] as usize,
        header[4] as usize,
        header[5] as usize,
        header[6] as usize,
    )?;

    let plan = ParamPlan::new(&config);
    let expected = header_bytes + plan.total() * 4;
    if mmap.len() != expected {
        return Err(ModelError::BadPayloadSize {
            expected,
            got: mmap.len(),
        });
    }

    let mut params = Vec::with_capacity(plan.total());
    for chunk in mmap[header_bytes..].chunks_exact(4) {
        params.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    log::info!(
        "loaded checkpoint {}: maxT={} V={} L={} NH={} C={} ({} parameters)",
        path.display(),
        config.max_seq_len,
        config.n_vocab,
        config.n_layers,
        config.n_heads,
        config.n_embd,
        plan.total()
    );

    Ok((config, params))
}

/// Write a checkpoint that `load` reproduces byte-exactly.
pub fn save(path: &Path, config: &GptConfig, params: &[f32]) -> Result<()> {
    let plan = ParamPlan::new(config);
    if params.len() != plan.total() {
        return Err(ModelError::BadPayloadSize {
            expected: plan.total(),
            got: params.len(),
        });
    }

    let mut header = [0i32; HEADER_LEN];
    header[0] = CHECKPOINT_MAGIC;
    header[1] = CHECKPOINT_VERSION;
    header[2] = config.max_seq_len as i32;
    header[3] = config.n_vocab as i32;
    header[4] = config.n_layers as i32;
    header[5] = config.n_heads as i32;
    header[6] = config.n_embd as i32;

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for entry in header {
        writer.write_all(&entry.to_le_bytes())?;
    }
    for &p in params {
        writer.write_all(&p.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_checkpoint() -> (GptConfig, Vec<f32>) {
        let config = GptConfig::new(4, 8, 1, 2, 4).unwrap();
        let n = ParamPlan::new(&config).total();
        let params: Vec<f32> = (0..n).map(|i| (i as f32) * 0.25 - 3.0).collect();
        (config, params)
    }

    #[test]
    fn test_round_trip_is_byte_exact() {
        let (config, params) = tiny_checkpoint();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");

        save(&path, &config, &params).unwrap();
        let original_bytes = std::fs::read(&path).unwrap();

        let (loaded_config, loaded_params) = load(&path).unwrap();
        assert_eq!(loaded_config, config);
        assert_eq!(loaded_params, params);

        // Re-emitting the loaded buffer reproduces the file exactly.
        let path2 = dir.path().join("model2.bin");
        save(&path2, &loaded_config, &loaded_params).unwrap();
        assert_eq!(std::fs::read(&path2).unwrap(), original_bytes);
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let (config, params) = tiny_checkpoint();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        save(&path, &config, &params).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            load(&path),
            Err(ModelError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let (config, params) = tiny_checkpoint();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        save(&path, &config, &params).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&2i32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            load(&path),
            Err(ModelError::UnsupportedVersion { found: 2 })
        ));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let (config, params) = tiny_checkpoint();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        save(&path, &config, &params).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        assert!(matches!(
            load(&path),
            Err(ModelError::BadPayloadSize { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.bin");
        assert!(matches!(load(&path), Err(ModelError::Io(_))));
    }
}
