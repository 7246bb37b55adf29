#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use stream_bridge::core::frame::{Frame, FrameCodec};
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::from_bytes(data);

    // Streaming decode over arbitrary input, including partial frames
    let mut buf = BytesMut::from(data);
    let mut codec = FrameCodec;
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
