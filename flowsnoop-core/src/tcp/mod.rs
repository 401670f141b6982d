//! Passive TCP stream reassembly for one port pair.
//!
//! The reassembler never sees the handshake reliably and can never ask for
//! a retransmission, so it tracks a single "next expected sequence number"
//! cursor and falls back on heuristics:
//!
//! - the cursor is seeded from the lowest pending segment,
//! - a SYN moves the cursor unless the jump is implausibly large,
//! - a gap that makes no progress for the desync timeout drops everything
//!   pending and starts over.

mod segment;

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

pub use segment::{PortPair, Segment, TcpFlags, TCP_HEADER_LEN};
use segment::{seq_le, seq_lt};

use crate::config::{DEFAULT_DESYNC_TIMEOUT, DEFAULT_SYN_JUMP_LIMIT};

/// Counters for one reassembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TcpStats {
    pub segments_stored: u64,
    pub foreign_dropped: u64,
    pub pure_acks_dropped: u64,
    pub malformed: u64,
    pub retransmits_discarded: u64,
    pub syn_resyncs: u64,
    pub syn_replays_ignored: u64,
    pub desync_resets: u64,
    pub segments_lost: u64,
    pub bytes_emitted: u64,
}

/// Reassembles one direction of a TCP connection into a byte stream.
#[derive(Debug)]
pub struct TcpReassembler {
    ports: PortPair,
    pool: Vec<Segment>,
    /// Next expected sequence number; `None` until seeded.
    cursor: Option<u32>,
    last_progress: Option<Instant>,
    desync_timeout: Duration,
    syn_jump_limit: u32,
    stats: TcpStats,
}

impl TcpReassembler {
    pub fn new(ports: PortPair) -> Self {
        Self {
            ports,
            pool: Vec::new(),
            cursor: None,
            last_progress: None,
            desync_timeout: DEFAULT_DESYNC_TIMEOUT,
            syn_jump_limit: DEFAULT_SYN_JUMP_LIMIT,
            stats: TcpStats::default(),
        }
    }

    pub fn with_desync_timeout(mut self, timeout: Duration) -> Self {
        self.desync_timeout = timeout;
        self
    }

    pub fn with_syn_jump_limit(mut self, limit: u32) -> Self {
        self.syn_jump_limit = limit;
        self
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn stats(&self) -> &TcpStats {
        &self.stats
    }

    /// Next expected sequence number, if the stream has been seeded.
    pub fn cursor(&self) -> Option<u32> {
        self.cursor
    }

    /// Number of segments waiting in the pool.
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    /// Pool a segment if it belongs to this port pair and carries stream
    /// content.
    pub fn filter_and_store(&mut self, segment: &[u8]) {
        self.filter_and_store_at(segment, Instant::now());
    }

    /// [`filter_and_store`](Self::filter_and_store) with an explicit
    /// acceptance time.
    pub fn filter_and_store_at(&mut self, segment: &[u8], now: Instant) {
        let (ports, segment) = match Segment::parse(segment, now) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("{e}, dropping segment");
                return;
            }
        };

        if ports != self.ports {
            self.stats.foreign_dropped += 1;
            trace!(
                src_port = ports.source,
                dst_port = ports.destination,
                "dropping segment for another port pair"
            );
            return;
        }

        if segment.data.is_empty() && !segment.flags.syn {
            self.stats.pure_acks_dropped += 1;
            return;
        }

        self.stats.segments_stored += 1;
        self.pool.push(segment);
    }

    /// Return the next contiguous run of stream bytes, if any.
    pub fn next_datagram(&mut self) -> Option<Vec<u8>> {
        self.next_datagram_at(Instant::now())
    }

    /// [`next_datagram`](Self::next_datagram) evaluated at `now`.
    pub fn next_datagram_at(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.pool.is_empty() {
            return None;
        }

        let mut cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let seed = self.lowest_pending_seq();
                debug!(seed, "seeding stream cursor from pending segment");
                seed
            }
        };

        if self.pool.len() > 1 {
            let base = cursor;
            self.pool.sort_by_key(|s| s.seq.wrapping_sub(base) as i32);
        }

        let mut out = Vec::new();
        let mut discard = vec![false; self.pool.len()];
        let mut progressed = false;

        for (index, segment) in self.pool.iter().enumerate() {
            if segment.flags.syn {
                let resync = segment.seq.wrapping_add(1);
                let jump = (resync.wrapping_sub(cursor) as i32).unsigned_abs();
                if jump > self.syn_jump_limit {
                    self.stats.syn_replays_ignored += 1;
                    warn!(
                        seq = segment.seq,
                        cursor, jump, "ignoring SYN with implausible sequence jump"
                    );
                    discard[index] = true;
                    continue;
                }

                if resync != cursor {
                    self.stats.syn_resyncs += 1;
                    debug!(from = cursor, to = resync, "SYN resynchronised stream");
                    cursor = resync;
                }
                // A SYN is acted on once; any data it carries starts the stream.
                discard[index] = true;
                progressed = true;
                if !segment.data.is_empty() {
                    out.extend_from_slice(&segment.data);
                    cursor = segment.end();
                }
                continue;
            }

            if seq_lt(cursor, segment.seq) {
                // Gap: wait for the missing data.
                break;
            }

            let overlap = cursor.wrapping_sub(segment.seq) as usize;
            progressed = true;
            if overlap >= segment.data.len() {
                self.stats.retransmits_discarded += 1;
                discard[index] = true;
                continue;
            }

            out.extend_from_slice(&segment.data[overlap..]);
            cursor = segment.end();

            if segment.flags.psh {
                break;
            }
        }

        self.cursor = Some(cursor);
        let mut index = 0;
        self.pool.retain(|s| {
            let keep = !discard[index] && !seq_le(s.end(), cursor);
            index += 1;
            keep
        });

        if progressed {
            self.last_progress = Some(now);
        }

        if !out.is_empty() {
            self.stats.bytes_emitted += out.len() as u64;
            return Some(out);
        }

        if self.is_desynced(now) {
            self.stats.desync_resets += 1;
            self.stats.segments_lost += self.pool.len() as u64;
            warn!(
                dropped = self.pool.len(),
                cursor,
                "stream gap exceeded desync timeout, dropping pending segments"
            );
            self.pool.clear();
            self.cursor = None;
            self.last_progress = None;
        }

        None
    }

    /// Lowest pending sequence number in wrapping order.
    fn lowest_pending_seq(&self) -> u32 {
        let pivot = self.pool[0].seq;
        self.pool
            .iter()
            .map(|s| s.seq)
            .min_by_key(|seq| seq.wrapping_sub(pivot) as i32)
            .unwrap_or(pivot)
    }

    /// Whether the pending segments have been stuck behind a gap for longer
    /// than the desync timeout.
    fn is_desynced(&self, now: Instant) -> bool {
        let Some(oldest) = self.pool.iter().map(|s| s.accepted_at).min() else {
            return false;
        };
        let since = match self.last_progress {
            Some(progress) => progress.max(oldest),
            None => oldest,
        };
        now.saturating_duration_since(since) > self.desync_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TcpBuilder;

    fn reassembler() -> TcpReassembler {
        TcpReassembler::new(PortPair::new(50000, 7000))
    }

    fn data(seq: u32, payload: &[u8]) -> Vec<u8> {
        TcpBuilder::new().seq(seq).payload(payload.to_vec()).build()
    }

    fn pushed(seq: u32, payload: &[u8]) -> Vec<u8> {
        TcpBuilder::new()
            .seq(seq)
            .psh_ack()
            .payload(payload.to_vec())
            .build()
    }

    // Test 1: Single PSH segment comes straight through
    #[test]
    fn test_single_psh_segment() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&pushed(5000, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]));

        assert_eq!(
            tcp.next_datagram(),
            Some(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10])
        );
        assert_eq!(tcp.pending(), 0);
        assert_eq!(tcp.cursor(), Some(5010));
    }

    // Test 2: Retransmitted segment is emitted once
    #[test]
    fn test_retransmit_suppressed() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&pushed(1000, b"Hello"));
        assert_eq!(tcp.next_datagram(), Some(b"Hello".to_vec()));

        tcp.filter_and_store(&pushed(1000, b"Hello"));
        assert_eq!(tcp.next_datagram(), None);
        assert_eq!(tcp.stats().retransmits_discarded, 1);
        assert_eq!(tcp.pending(), 0);
    }

    // Test 3: Out-of-order arrival is merged in sequence order
    #[test]
    fn test_out_of_order_merge() {
        let mut tcp = reassembler();
        let high: Vec<u8> = (10..20).collect();
        let low: Vec<u8> = (0..10).collect();
        tcp.filter_and_store(&data(3010, &high));
        tcp.filter_and_store(&data(3000, &low));

        assert_eq!(tcp.next_datagram(), Some((0..20).collect()));
        assert_eq!(tcp.next_datagram(), None);
    }

    // Test 4: PSH boundaries split out-of-order data into two reads
    #[test]
    fn test_out_of_order_with_psh() {
        let mut tcp = reassembler();
        let high: Vec<u8> = (10..20).collect();
        let low: Vec<u8> = (0..10).collect();
        tcp.filter_and_store(&pushed(3010, &high));
        tcp.filter_and_store(&pushed(3000, &low));

        assert_eq!(tcp.next_datagram(), Some(low));
        assert_eq!(tcp.next_datagram(), Some(high));
        assert_eq!(tcp.next_datagram(), None);
    }

    // Test 5: Filtering of acks, foreign ports and runts
    #[test]
    fn test_filtering() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&TcpBuilder::new().seq(1).ack().build());
        tcp.filter_and_store(&TcpBuilder::new().src_port(1).payload(vec![1]).build());
        tcp.filter_and_store(&[0u8; 12]);

        assert_eq!(tcp.pending(), 0);
        assert_eq!(tcp.stats().pure_acks_dropped, 1);
        assert_eq!(tcp.stats().foreign_dropped, 1);
        assert_eq!(tcp.stats().malformed, 1);
    }

    // Test 6: A gap holds back later data until it is filled
    #[test]
    fn test_gap_then_fill() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&pushed(100, b"abc"));
        assert_eq!(tcp.next_datagram(), Some(b"abc".to_vec()));

        tcp.filter_and_store(&pushed(106, b"ghi"));
        assert_eq!(tcp.next_datagram(), None);
        assert_eq!(tcp.pending(), 1);

        tcp.filter_and_store(&data(103, b"def"));
        assert_eq!(tcp.next_datagram(), Some(b"defghi".to_vec()));
    }

    // Test 7: SYN sets the cursor past its own sequence number
    #[test]
    fn test_syn_seeds_stream() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&TcpBuilder::new().seq(999).syn().build());
        tcp.filter_and_store(&pushed(1000, b"data"));

        assert_eq!(tcp.next_datagram(), Some(b"data".to_vec()));
        assert_eq!(tcp.cursor(), Some(1004));
    }

    // Test 8: SYN far away from the cursor is ignored
    #[test]
    fn test_syn_replay_ignored() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&pushed(1000, b"one"));
        assert_eq!(tcp.next_datagram(), Some(b"one".to_vec()));

        tcp.filter_and_store(&TcpBuilder::new().seq(1003 + 200_000).syn().build());
        tcp.filter_and_store(&data(1003, b"two"));

        assert_eq!(tcp.next_datagram(), Some(b"two".to_vec()));
        assert_eq!(tcp.stats().syn_replays_ignored, 1);
        assert_eq!(tcp.pending(), 0);
    }

    // Test 9: Stuck gap resets the stream after the desync timeout
    #[test]
    fn test_desync_reset() {
        let t0 = Instant::now();
        let mut tcp = reassembler();

        tcp.filter_and_store_at(&pushed(1000, b"first"), t0);
        assert_eq!(tcp.next_datagram_at(t0), Some(b"first".to_vec()));

        tcp.filter_and_store_at(&pushed(2000, b"late"), t0);
        assert_eq!(tcp.next_datagram_at(t0 + Duration::from_millis(1000)), None);
        assert_eq!(tcp.pending(), 1);

        assert_eq!(tcp.next_datagram_at(t0 + Duration::from_millis(2500)), None);
        assert_eq!(tcp.pending(), 0);
        assert_eq!(tcp.cursor(), None);
        assert_eq!(tcp.stats().desync_resets, 1);
        assert_eq!(tcp.stats().segments_lost, 1);

        let t1 = t0 + Duration::from_millis(3000);
        tcp.filter_and_store_at(&pushed(9000, b"fresh"), t1);
        assert_eq!(tcp.next_datagram_at(t1), Some(b"fresh".to_vec()));
    }

    // Test 10: Partial overlap emits only the new tail
    #[test]
    fn test_partial_overlap() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&data(1000, b"Hello"));
        tcp.filter_and_store(&pushed(1003, b"loWorld"));

        assert_eq!(tcp.next_datagram(), Some(b"HelloWorld".to_vec()));
        assert_eq!(tcp.cursor(), Some(1010));
    }

    // Test 11: Overlapping segment behind a PSH boundary keeps its tail
    #[test]
    fn test_overlap_after_psh_retained() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&pushed(100, &[0; 10]));
        tcp.filter_and_store(&pushed(105, &[1; 15]));

        assert_eq!(tcp.next_datagram(), Some(vec![0; 10]));
        assert_eq!(tcp.next_datagram(), Some(vec![1; 10]));
        assert_eq!(tcp.next_datagram(), None);
    }

    // Test 12: Sequence number wraparound
    #[test]
    fn test_sequence_wraparound() {
        let near_max = u32::MAX - 2;
        let mut tcp = reassembler();
        tcp.filter_and_store(&data(near_max.wrapping_add(3), b"DEF"));
        tcp.filter_and_store(&data(near_max, b"ABC"));

        assert_eq!(tcp.next_datagram(), Some(b"ABCDEF".to_vec()));
        assert_eq!(tcp.cursor(), Some(3));
    }

    // Test 13: Draining is idempotent
    #[test]
    fn test_idempotent_drain() {
        let mut tcp = reassembler();
        assert_eq!(tcp.next_datagram(), None);

        tcp.filter_and_store(&data(1, b"x"));
        assert!(tcp.next_datagram().is_some());
        for _ in 0..3 {
            assert_eq!(tcp.next_datagram(), None);
        }
    }

    // Test 14: SYN carrying data is consumed once
    #[test]
    fn test_syn_with_data() {
        let mut tcp = reassembler();
        tcp.filter_and_store(&TcpBuilder::new().seq(499).syn().payload(b"hi".to_vec()).build());
        tcp.filter_and_store(&data(502, b"!"));

        assert_eq!(tcp.next_datagram(), Some(b"hi!".to_vec()));
        assert_eq!(tcp.pending(), 0);

        // Retransmitted data after the SYN is still suppressed.
        tcp.filter_and_store(&data(502, b"!"));
        assert_eq!(tcp.next_datagram(), None);
        assert_eq!(tcp.stats().retransmits_discarded, 1);
    }
}
