//! Packet body compression.
//!
//! The codec compresses a serialized packet body when it is large enough and
//! looks compressible. Decompression enforces an output ceiling so a forged
//! size header cannot trigger huge allocations.

use serde::{Deserialize, Serialize};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{BridgeError, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Lz4,
    Zstd,
}

impl CompressionKind {
    /// Flag bits the codec stores in its header.
    pub fn flag(self) -> u8 {
        match self {
            CompressionKind::Lz4 => 0b01,
            CompressionKind::Zstd => 0b10,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0b01 => Some(CompressionKind::Lz4),
            0b10 => Some(CompressionKind::Zstd),
            _ => None,
        }
    }
}

/// Upper bound for decompressed output
const MAX_DECOMPRESSION_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Bits per byte above which a sample is treated as incompressible
const MIN_ENTROPY_THRESHOLD: f64 = 4.0;

/// Shannon entropy of `data` in bits per byte (0.0 to 8.0).
fn calculate_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0u32; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    freq.iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn worth_compressing(data: &[u8], threshold_bytes: usize) -> bool {
    if data.len() < threshold_bytes {
        return false;
    }
    if data.len() < 1024 {
        return true;
    }
    let sample = &data[..data.len().min(512)];
    calculate_entropy(sample) < MIN_ENTROPY_THRESHOLD
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `BridgeError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| BridgeError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Decompresses data that was compressed with the specified algorithm
///
/// # Errors
/// Returns `BridgeError::DecompressionFailure` if the input is corrupt or the
/// output would exceed the payload ceiling.
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Lz4 => {
            if data.len() < 4 {
                return Err(BridgeError::DecompressionFailure);
            }
            // lz4_flex prepends the uncompressed size as u32 little-endian
            let claimed = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed > MAX_DECOMPRESSION_SIZE {
                return Err(BridgeError::DecompressionFailure);
            }
            lz4_flex::decompress_size_prepended(data).map_err(|_| BridgeError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            use std::io::Read;

            let mut reader =
                zstd::stream::Decoder::new(data).map_err(|_| BridgeError::DecompressionFailure)?;
            let mut out = Vec::new();
            let mut buffer = [0u8; 8192];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        out.extend_from_slice(&buffer[..n]);
                        if out.len() > MAX_DECOMPRESSION_SIZE {
                            return Err(BridgeError::DecompressionFailure);
                        }
                    }
                    Err(_) => return Err(BridgeError::DecompressionFailure),
                }
            }
            Ok(out)
        }
    }
}

/// Compress when the data is over `threshold_bytes`, looks compressible, and
/// actually shrinks. Returns the output and whether compression was applied.
pub fn maybe_compress_adaptive(
    data: &[u8],
    kind: CompressionKind,
    threshold_bytes: usize,
) -> Result<(Vec<u8>, bool)> {
    if worth_compressing(data, threshold_bytes) {
        let compressed = compress(data, kind)?;
        if compressed.len() < data.len() {
            return Ok((compressed, true));
        }
    }
    Ok((data.to_vec(), false))
}
