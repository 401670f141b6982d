//! IPv4 fragment reassembly for one (source, destination, protocol) triplet.
//!
//! [`IpReassembler::filter_and_store`] splits a capture batch into datagrams
//! and keeps the ones addressed to the tracked triplet.
//! [`IpReassembler::next_payload`] hands back one complete transport-layer
//! payload at a time, stitching fragment groups together as their pieces
//! arrive.
//!
//! IPv6 datagrams are stepped over but never reassembled; the observed
//! traffic does not fragment over IPv6.

mod fragment;

use std::net::Ipv4Addr;

use tracing::{debug, trace, warn};

pub use fragment::{ipv6_datagram_len, Fragment, Ipv4Header, MAX_DATAGRAM_LEN};

use crate::config::DEFAULT_STALE_FRAGMENT_WINDOW;

/// The addresses and transport protocol a reassembler accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpTriplet {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
}

impl IpTriplet {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, protocol: u8) -> Self {
        Self {
            source,
            destination,
            protocol,
        }
    }

    fn matches(&self, header: &Ipv4Header) -> bool {
        header.source == self.source
            && header.destination == self.destination
            && header.protocol == self.protocol
    }
}

/// Counters for one reassembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpStats {
    pub datagrams_stored: u64,
    pub foreign_dropped: u64,
    pub ipv6_skipped: u64,
    pub malformed: u64,
    pub payloads_completed: u64,
    pub stale_purged: u64,
}

/// Reassembles the IPv4 datagrams of one flow direction.
#[derive(Debug)]
pub struct IpReassembler {
    triplet: IpTriplet,
    pool: Vec<Fragment>,
    stale_window: u16,
    stats: IpStats,
}

impl IpReassembler {
    pub fn new(triplet: IpTriplet) -> Self {
        Self {
            triplet,
            pool: Vec::new(),
            stale_window: DEFAULT_STALE_FRAGMENT_WINDOW,
            stats: IpStats::default(),
        }
    }

    pub fn with_stale_window(mut self, window: u16) -> Self {
        self.stale_window = window;
        self
    }

    pub fn triplet(&self) -> &IpTriplet {
        &self.triplet
    }

    pub fn stats(&self) -> &IpStats {
        &self.stats
    }

    /// Number of datagrams waiting in the pool.
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    /// Scan `buffer[..usable_len]` for datagrams and pool the matching ones.
    ///
    /// A malformed datagram ends processing of the batch: everything after it
    /// is unframed and cannot be trusted.
    pub fn filter_and_store(&mut self, buffer: &[u8], usable_len: usize) {
        if usable_len > buffer.len() {
            warn!(
                usable_len,
                buffer_len = buffer.len(),
                "capture length exceeds buffer, ignoring batch"
            );
            return;
        }

        let batch = &buffer[..usable_len];
        let mut offset = 0;

        while offset < batch.len() {
            let rest = &batch[offset..];

            match rest[0] >> 4 {
                4 => match Ipv4Header::parse(rest) {
                    Ok(header) => {
                        if self.triplet.matches(&header) {
                            self.pool.push(Fragment::new(header, rest));
                            self.stats.datagrams_stored += 1;
                        } else {
                            self.stats.foreign_dropped += 1;
                            trace!(
                                src = %header.source,
                                dst = %header.destination,
                                protocol = header.protocol,
                                "dropping datagram for another flow"
                            );
                        }
                        offset += header.datagram_len;
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!(offset, "{e}, dropping rest of capture batch");
                        break;
                    }
                },
                6 => match ipv6_datagram_len(rest) {
                    Ok(len) => {
                        self.stats.ipv6_skipped += 1;
                        offset += len;
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!(offset, "{e}, dropping rest of capture batch");
                        break;
                    }
                },
                version => {
                    self.stats.malformed += 1;
                    warn!(
                        offset,
                        version, "unrecognised IP version, dropping rest of capture batch"
                    );
                    break;
                }
            }
        }
    }

    /// Return the next fully reassembled transport payload, if any.
    ///
    /// Fragments that cannot be merged yet stay pooled; calling again after
    /// more data arrives retries them.
    pub fn next_payload(&mut self) -> Option<Vec<u8>> {
        if self.pool.len() == 1 && !self.pool[0].header.is_fragment() {
            self.stats.payloads_completed += 1;
            return self.pool.pop().map(Fragment::into_payload);
        }
        if self.pool.is_empty() {
            return None;
        }

        self.pool.sort_by_key(|f| (f.identification(), f.offset()));

        let mut current = None;
        let mut payload = Vec::new();
        let mut expected_offset = 0;
        let mut completed = None;

        for (index, fragment) in self.pool.iter().enumerate() {
            if current != Some(fragment.identification()) {
                current = Some(fragment.identification());
                payload.clear();
                expected_offset = 0;
            }

            if fragment.offset() != expected_offset {
                continue;
            }

            payload.extend_from_slice(fragment.payload());
            expected_offset += fragment.payload().len();

            if !fragment.header.more_fragments {
                completed = Some((index, fragment.identification()));
                break;
            }
        }

        let (index, identification) = completed?;
        if self.pool[index].header.is_fragment() {
            self.pool.retain(|f| f.identification() != identification);
            debug!(
                identification,
                len = payload.len(),
                "reassembled fragmented datagram"
            );
        } else {
            // Unfragmented datagrams are groups of one; DF traffic may
            // repeat the identification.
            self.pool.remove(index);
        }
        self.purge_stale(identification);
        self.stats.payloads_completed += 1;
        Some(payload)
    }

    /// Drop fragment groups that have fallen too far behind the last
    /// completed identification to ever complete. Whole datagrams are always
    /// deliverable and are left alone.
    fn purge_stale(&mut self, completed: u16) {
        let window = self.stale_window;
        let before = self.pool.len();

        self.pool.retain(|f| {
            !(f.header.is_fragment() && is_stale(f.identification(), completed, window))
        });

        let stale = before - self.pool.len();
        if stale > 0 {
            self.stats.stale_purged += stale as u64;
            debug!(stale, completed, "purged stale fragments");
        }
    }
}

/// Whether `id` lies more than `window` identifications behind `completed`.
fn is_stale(id: u16, completed: u16, window: u16) -> bool {
    let behind = completed.wrapping_sub(id);
    behind > window && behind < 0x8000
}
