//! Fuzz target for bundle framing and decompression.
//!
//! Arbitrary bytes are fed to the decoder in two writes to cover frames
//! split across stream deliveries. A valid header is prepended when the
//! first input byte is odd so the body codecs and record splitter see
//! fuzzed bodies rather than only the magic search.

#![no_main]

use flowsnoop_core::bundle::BundleDecoder;
use flowsnoop_core::test_utils::BundleBuilder;
use libfuzzer_sys::fuzz_target;

const MAX_FRAME_LEN: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let Some((&mode, body)) = data.split_first() else {
        return;
    };

    let stream = if mode & 1 == 1 {
        let uncompressed_len = body.len() as u32 * 4;
        BundleBuilder::new()
            .compression((mode >> 1) & 0x03)
            .message_count(u16::from(mode >> 3))
            .raw_body(body.to_vec(), uncompressed_len)
            .build()
    } else {
        body.to_vec()
    };

    let mut decoder = BundleDecoder::new()
        .with_max_frame_len(MAX_FRAME_LEN)
        .with_max_decoded_len(4 * MAX_FRAME_LEN);

    let split = stream.len() / 2;
    decoder.store_data(&stream[..split]);
    decoder.store_data(&stream[split..]);

    while let Some(message) = decoder.next_message() {
        assert!(message.payload.len() <= usize::from(u16::MAX));
    }
    assert!(decoder.buffered() <= stream.len());
});
