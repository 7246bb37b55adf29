#![no_main]

use libfuzzer_sys::fuzz_target;
use stream_bridge::core::codec::PacketCodec;

fuzz_target!(|data: &[u8]| {
    // Packet decoding must reject garbage without panicking
    let _ = PacketCodec::default().decode(data);
});
