#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use shoal_transport::decode_reply;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    // Keep decoding until the buffer is exhausted, incomplete or invalid
    while let Ok(Some(_)) = decode_reply(&mut buf) {}
});
