//! Fuzz target for TCP stream reassembly.
//!
//! The input is split into length-prefixed segments (one length byte each)
//! and fed to a single reassembler with accepted times spread over the
//! desync timeout, so gap resets are reached as well as ordinary merging.

#![no_main]

use std::time::{Duration, Instant};

use flowsnoop_core::tcp::{PortPair, TcpReassembler};
use flowsnoop_core::test_utils::TcpBuilder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let start = Instant::now();
    let mut tcp = TcpReassembler::new(PortPair::new(50000, 7000));
    let mut rest = data;
    let mut step = 0u64;

    while rest.len() >= 6 {
        let seq = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let flags = rest[4];
        let len = usize::from(rest[5]).min(rest.len() - 6);
        let payload = rest[6..6 + len].to_vec();
        rest = &rest[6 + len..];

        let segment = TcpBuilder::new()
            .seq(seq)
            .flags(flags)
            .payload(payload)
            .build();

        let now = start + Duration::from_millis(step * 300);
        step += 1;
        tcp.filter_and_store_at(&segment, now);
        while let Some(stream) = tcp.next_datagram_at(now) {
            assert!(!stream.is_empty());
        }
        assert!(tcp.next_datagram_at(now).is_none());
    }

    // Raw input as a single segment exercises the header reader.
    tcp.filter_and_store_at(data, start);
});
