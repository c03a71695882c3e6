#![no_main]

use libfuzzer_sys::fuzz_target;
use session_protocol::core::packet::Packet;
use session_protocol::utils::compression::CompressionKind;

fuzz_target!(|data: &[u8]| {
    // Fuzz packet decoding - test for panics, over-reads and decompression bombs
    for kind in [CompressionKind::Zlib, CompressionKind::Lz4, CompressionKind::Zstd] {
        if let Ok((packet, used)) = Packet::decode(data, kind) {
            assert!(used <= data.len());
            // anything that decodes must encode again
            let _ = packet.encode(kind);
        }
    }
});
