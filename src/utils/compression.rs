//! Packet body compression.
//!
//! Bodies are compressed with one algorithm agreed on by both ends (zlib by
//! default, which is what the reference client speaks). The codec only keeps a
//! compressed body when it actually saves space and fits in a single
//! compressed block, see [`compress_if_smaller`].

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Maximum size of a compressed data block, in bytes.
pub const MAX_COMPRESSED_SIZE: usize = 65536;

/// Maximum output size for decompression. No packet body in this protocol
/// comes anywhere near it; it only exists to stop decompression bombs.
pub const MAX_DECOMPRESSED_SIZE: usize = 1024 * 1024;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Zlib,
    Lz4,
    Zstd,
}

impl CompressionKind {
    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::Zlib => "zlib",
            CompressionKind::Lz4 => "lz4",
            CompressionKind::Zstd => "zstd",
        }
    }
}

/// Compresses data using the specified compression algorithm
///
/// # Errors
/// Returns `ProtocolError::CompressionFailure` if compression fails
pub fn compress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            encoder
                .finish()
                .map_err(|_| ProtocolError::CompressionFailure)
        }
        CompressionKind::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionKind::Zstd => {
            let mut out = Vec::new();
            zstd::stream::copy_encode(data, &mut out, 1)
                .map_err(|_| ProtocolError::CompressionFailure)?;
            Ok(out)
        }
    }
}

/// Reads a decoder to the end, failing once more than `MAX_DECOMPRESSED_SIZE`
/// bytes come out of it.
fn read_capped<R: Read>(reader: R) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take(MAX_DECOMPRESSED_SIZE as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|_| ProtocolError::DecompressionFailure)?;
    if out.len() > MAX_DECOMPRESSED_SIZE {
        return Err(ProtocolError::DecompressionFailure);
    }
    Ok(out)
}

/// Decompresses data that was compressed with the specified algorithm
///
/// Output is capped at `MAX_DECOMPRESSED_SIZE`.
///
/// # Errors
/// Returns `ProtocolError::DecompressionFailure` if the data is malformed or
/// inflates past the cap.
pub fn decompress(data: &[u8], kind: CompressionKind) -> Result<Vec<u8>> {
    match kind {
        CompressionKind::Zlib => read_capped(flate2::read::ZlibDecoder::new(data)),
        CompressionKind::Lz4 => {
            // lz4_flex allocates from the prepended size, so check it first
            if data.len() < 4 {
                return Err(ProtocolError::DecompressionFailure);
            }
            let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
            if claimed_size > MAX_DECOMPRESSED_SIZE {
                return Err(ProtocolError::DecompressionFailure);
            }
            lz4_flex::decompress_size_prepended(data)
                .map_err(|_| ProtocolError::DecompressionFailure)
        }
        CompressionKind::Zstd => {
            let decoder = zstd::stream::Decoder::new(data)
                .map_err(|_| ProtocolError::DecompressionFailure)?;
            read_capped(decoder)
        }
    }
}

/// Compresses `data` and returns the compressed block only if it is strictly
/// smaller than the input and no larger than `MAX_COMPRESSED_SIZE`.
///
/// Returns `Ok(None)` when the raw body should be sent instead.
pub fn compress_if_smaller(data: &[u8], kind: CompressionKind) -> Result<Option<Vec<u8>>> {
    if data.is_empty() {
        return Ok(None);
    }
    let compressed = compress(data, kind)?;
    if compressed.len() < data.len() && compressed.len() <= MAX_COMPRESSED_SIZE {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CompressionKind; 3] = [
        CompressionKind::Zlib,
        CompressionKind::Lz4,
        CompressionKind::Zstd,
    ];

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_compression_roundtrip_all_kinds() {
        let original = b"Hello, World! Hello, World! Hello, World! Hello, World!";
        for kind in ALL {
            let compressed = compress(original, kind).unwrap();
            let decompressed = decompress(&compressed, kind).unwrap();
            assert_eq!(original.as_slice(), decompressed.as_slice(), "{}", kind.name());
        }
    }

    #[test]
    fn test_lz4_oom_attack_prevention() {
        // claims to decompress to 3+ GB
        let malicious_payload = vec![0x2b, 0x60, 0xbb, 0xbb];
        assert!(decompress(&malicious_payload, CompressionKind::Lz4).is_err());
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        assert!(decompress(&[0x2b, 0x60], CompressionKind::Lz4).is_err());
    }

    #[test]
    fn test_malformed_zlib_data() {
        let malformed = vec![0x78, 0x9c, 0xff, 0xff, 0xff, 0x00, 0x13];
        assert!(decompress(&malformed, CompressionKind::Zlib).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_zlib_bomb_is_capped() {
        let bomb = compress(&vec![0u8; MAX_DECOMPRESSED_SIZE + 10], CompressionKind::Zlib).unwrap();
        assert!(bomb.len() < MAX_COMPRESSED_SIZE);
        assert!(matches!(
            decompress(&bomb, CompressionKind::Zlib),
            Err(ProtocolError::DecompressionFailure)
        ));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_compress_if_smaller_keeps_repetitive_data() {
        let data = vec![7u8; 2048];
        let block = compress_if_smaller(&data, CompressionKind::Zlib).unwrap().unwrap();
        assert!(block.len() < data.len());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_compress_if_smaller_skips_tiny_bodies() {
        // zlib framing alone is larger than a 3-byte body
        assert!(compress_if_smaller(b"abc", CompressionKind::Zlib).unwrap().is_none());
        assert!(compress_if_smaller(b"", CompressionKind::Zlib).unwrap().is_none());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_compress_if_smaller_respects_block_limit() {
        // incompressible data larger than one block never gets compressed
        let mut state = 0x1234_5678u32;
        let data: Vec<u8> = (0..MAX_COMPRESSED_SIZE * 2)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xff) as u8
            })
            .collect();
        assert!(compress_if_smaller(&data, CompressionKind::Zlib).unwrap().is_none());
    }
}
