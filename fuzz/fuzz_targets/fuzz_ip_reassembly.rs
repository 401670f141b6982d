//! Fuzz target for IPv4 fragment reassembly.
//!
//! The input is treated as a capture batch. The first byte picks the usable
//! length so truncated batches are covered too. Fragments are consumed when
//! their group completes, so the payloads together never exceed the input.

#![no_main]

use std::net::Ipv4Addr;

use flowsnoop_core::ip::{IpReassembler, IpTriplet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&trim, batch)) = data.split_first() else {
        return;
    };
    let usable_len = batch.len().saturating_sub(usize::from(trim % 8));

    let mut ip = IpReassembler::new(IpTriplet::new(
        Ipv4Addr::new(192, 168, 1, 1),
        Ipv4Addr::new(192, 168, 1, 2),
        6,
    ));
    ip.filter_and_store(batch, usable_len);

    let mut delivered = 0;
    while let Some(payload) = ip.next_payload() {
        delivered += payload.len();
        assert!(delivered <= usable_len);
    }

    // Draining is idempotent.
    assert!(ip.next_payload().is_none());
});
