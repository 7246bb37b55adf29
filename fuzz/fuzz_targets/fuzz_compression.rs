#![no_main]

use libfuzzer_sys::fuzz_target;
use stream_bridge::utils::compression::{compress, decompress, CompressionKind};

fuzz_target!(|data: &[u8]| {
    for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
        if let Ok(compressed) = compress(data, kind) {
            let _ = decompress(&compressed, kind);
        }
        // forged headers must hit the size ceiling, not the allocator
        let _ = decompress(data, kind);
    }
});
