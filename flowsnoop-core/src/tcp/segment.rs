use std::time::Instant;

use etherparse::TcpHeaderSlice;

use crate::error::ProtocolError;

/// Fixed TCP header length (data offset = 5).
pub const TCP_HEADER_LEN: usize = 20;

/// TCP flags that matter to passive reassembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

/// Source and destination port of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub source: u16,
    pub destination: u16,
}

impl PortPair {
    pub fn new(source: u16, destination: u16) -> Self {
        Self {
            source,
            destination,
        }
    }
}

/// A TCP segment waiting in the segment pool.
#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: u32,
    pub flags: TcpFlags,
    pub data: Vec<u8>,
    /// When the segment was accepted into the pool.
    pub accepted_at: Instant,
}

impl Segment {
    /// Parse a complete TCP segment (header plus data).
    pub fn parse(data: &[u8], accepted_at: Instant) -> Result<(PortPair, Self), ProtocolError> {
        if data.len() < TCP_HEADER_LEN {
            return Err(ProtocolError::too_short("tcp", TCP_HEADER_LEN, data.len()));
        }

        let header = TcpHeaderSlice::from_slice(data)
            .map_err(|e| ProtocolError::invalid("tcp", "header", e.to_string()))?;

        let ports = PortPair::new(header.source_port(), header.destination_port());
        let segment = Segment {
            seq: header.sequence_number(),
            flags: TcpFlags {
                syn: header.syn(),
                ack: header.ack(),
                fin: header.fin(),
                rst: header.rst(),
                psh: header.psh(),
            },
            data: data[header.slice().len()..].to_vec(),
            accepted_at,
        };

        Ok((ports, segment))
    }

    /// Sequence number just past this segment. A SYN occupies one number.
    pub fn end(&self) -> u32 {
        let len = self.data.len() + usize::from(self.flags.syn);
        seq_add(self.seq, len)
    }
}

// Sequence number comparison helpers
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

pub(crate) fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

pub(crate) fn seq_add(a: u32, n: usize) -> u32 {
    a.wrapping_add(n as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TcpBuilder;

    #[test]
    fn test_parse_segment() {
        let raw = TcpBuilder::new()
            .src_port(1234)
            .dst_port(80)
            .seq(1000)
            .psh_ack()
            .payload(b"hello".to_vec())
            .build();

        let (ports, segment) = Segment::parse(&raw, Instant::now()).unwrap();
        assert_eq!(ports, PortPair::new(1234, 80));
        assert_eq!(segment.seq, 1000);
        assert!(segment.flags.psh);
        assert!(segment.flags.ack);
        assert!(!segment.flags.syn);
        assert_eq!(segment.data, b"hello");
        assert_eq!(segment.end(), 1005);
    }

    #[test]
    fn test_parse_with_options() {
        let raw = TcpBuilder::new()
            .options_words(3)
            .payload(vec![7, 7])
            .build();

        let (_, segment) = Segment::parse(&raw, Instant::now()).unwrap();
        assert_eq!(segment.data, vec![7, 7]);
    }

    #[test]
    fn test_too_short() {
        let raw = TcpBuilder::new().build();
        assert!(matches!(
            Segment::parse(&raw[..19], Instant::now()),
            Err(ProtocolError::PacketTooShort { needed: 20, have: 19, .. })
        ));
    }

    #[test]
    fn test_data_offset_past_end() {
        let mut raw = TcpBuilder::new().build();
        raw[12] = 0xf0; // 60-byte header in a 20-byte buffer
        assert!(Segment::parse(&raw, Instant::now()).is_err());
    }

    #[test]
    fn test_syn_end() {
        let raw = TcpBuilder::new().seq(u32::MAX).syn().build();
        let (_, segment) = Segment::parse(&raw, Instant::now()).unwrap();
        assert_eq!(segment.end(), 0);
    }

    #[test]
    fn test_seq_helpers_wrap() {
        assert!(seq_lt(u32::MAX - 1, 2));
        assert!(!seq_lt(2, u32::MAX - 1));
        assert!(seq_le(5, 5));
        assert_eq!(seq_add(u32::MAX, 2), 1);
    }
}
