#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use enclave_mail::frame::codec::FrameCodec;

fuzz_target!(|data: &[u8]| {
    // Small limit so the oversized-frame path is reachable.
    let mut codec = FrameCodec::with_max_payload_size(1024);
    let mut buf = BytesMut::from(data);

    loop {
        match codec.decode(&mut buf) {
            Ok(Some(_)) => {}
            Ok(None) => {
                let _ = codec.decode_eof(&mut buf);
                break;
            }
            Err(_) => break,
        }
    }
});
