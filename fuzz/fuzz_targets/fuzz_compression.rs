#![no_main]

use libfuzzer_sys::fuzz_target;
use session_protocol::utils::compression::{compress, decompress, CompressionKind};

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Zlib, CompressionKind::Lz4, CompressionKind::Zstd] {
        // roundtrip must be lossless
        if let Ok(compressed) = compress(data, kind) {
            if let Ok(out) = decompress(&compressed, kind) {
                assert_eq!(out, data);
            }
        }

        // raw decompression of malformed data must respect the size cap
        let _ = decompress(data, kind);
    }
});
