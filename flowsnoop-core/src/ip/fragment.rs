use std::net::Ipv4Addr;

use etherparse::err::{ipv4, ipv6};
use etherparse::{Ipv4HeaderSlice, Ipv6HeaderSlice};

use crate::error::ProtocolError;

/// Largest datagram an IP total-length field can describe.
pub const MAX_DATAGRAM_LEN: usize = 65535;

/// Fields read from an IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Header length in bytes (IHL * 4).
    pub header_len: usize,
    /// Length of the whole datagram. Equals the total-length field unless
    /// the capture had length offload, in which case it is the number of
    /// bytes left in the capture batch.
    pub datagram_len: usize,
    pub identification: u16,
    pub more_fragments: bool,
    /// Fragment offset in bytes.
    pub fragment_offset: usize,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Parse the header at the front of `data`, where `data` runs to the end
    /// of the usable capture region.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let ipv4 = Ipv4HeaderSlice::from_slice(data).map_err(|e| match e {
            ipv4::HeaderSliceError::Len(len) => {
                ProtocolError::too_short("ipv4", len.required_len, len.len)
            }
            ipv4::HeaderSliceError::Content(ipv4::HeaderError::HeaderLengthSmallerThanHeader {
                ihl,
            }) => ProtocolError::invalid("ipv4", "ihl", format!("{} bytes", usize::from(ihl) * 4)),
            ipv4::HeaderSliceError::Content(other) => {
                ProtocolError::invalid("ipv4", "header", other.to_string())
            }
        })?;

        let header_len = ipv4.slice().len();
        let identification = ipv4.identification();

        let datagram_len = match ipv4.total_len() {
            // Checksum/length offload leaves the field zeroed on outgoing
            // packets; the datagram then spans the rest of the capture.
            0 if identification != 0 => data.len(),
            0 => {
                return Err(ProtocolError::invalid(
                    "ipv4",
                    "total_length",
                    "zero with zero identification",
                ))
            }
            n => usize::from(n),
        };

        if datagram_len > MAX_DATAGRAM_LEN {
            return Err(ProtocolError::invalid(
                "ipv4",
                "total_length",
                format!("{datagram_len} exceeds {MAX_DATAGRAM_LEN}"),
            ));
        }
        if datagram_len < header_len {
            return Err(ProtocolError::invalid(
                "ipv4",
                "total_length",
                format!("{datagram_len} shorter than header ({header_len})"),
            ));
        }
        if datagram_len > data.len() {
            return Err(ProtocolError::too_short("ipv4", datagram_len, data.len()));
        }

        Ok(Self {
            header_len,
            datagram_len,
            identification,
            more_fragments: ipv4.more_fragments(),
            fragment_offset: usize::from(ipv4.fragments_offset().value()) * 8,
            protocol: ipv4.protocol().0,
            source: ipv4.source_addr(),
            destination: ipv4.destination_addr(),
        })
    }

    /// Whether this datagram is a piece of a larger one.
    pub fn is_fragment(&self) -> bool {
        self.more_fragments || self.fragment_offset != 0
    }
}

/// Length of the IPv6 datagram at the front of `data` (header + payload).
pub fn ipv6_datagram_len(data: &[u8]) -> Result<usize, ProtocolError> {
    let ipv6 = Ipv6HeaderSlice::from_slice(data).map_err(|e| match e {
        ipv6::HeaderSliceError::Len(len) => {
            ProtocolError::too_short("ipv6", len.required_len, len.len)
        }
        ipv6::HeaderSliceError::Content(other) => {
            ProtocolError::invalid("ipv6", "header", other.to_string())
        }
    })?;

    let len = ipv6.slice().len() + usize::from(ipv6.payload_length());
    if len > data.len() {
        return Err(ProtocolError::too_short("ipv6", len, data.len()));
    }
    Ok(len)
}

/// One captured IPv4 datagram waiting in the fragment pool.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: Ipv4Header,
    /// The datagram bytes, header included.
    data: Vec<u8>,
}

impl Fragment {
    /// Copy the datagram described by `header` out of the capture buffer.
    pub fn new(header: Ipv4Header, datagram: &[u8]) -> Self {
        Self {
            header,
            data: datagram[..header.datagram_len].to_vec(),
        }
    }

    pub fn identification(&self) -> u16 {
        self.header.identification
    }

    pub fn offset(&self) -> usize {
        self.header.fragment_offset
    }

    /// Transport-layer bytes carried by this fragment.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.header.header_len..]
    }

    pub fn into_payload(mut self) -> Vec<u8> {
        self.data.drain(..self.header.header_len);
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Ipv4Builder;

    #[test]
    fn test_parse_basic_header() {
        let packet = Ipv4Builder::new()
            .identification(0x1234)
            .payload(vec![0xaa; 8])
            .build();

        let header = Ipv4Header::parse(&packet).unwrap();
        assert_eq!(header.header_len, 20);
        assert_eq!(header.datagram_len, 28);
        assert_eq!(header.identification, 0x1234);
        assert_eq!(header.protocol, 6);
        assert_eq!(header.source, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(header.destination, Ipv4Addr::new(192, 168, 1, 2));
        assert!(!header.is_fragment());
    }

    #[test]
    fn test_fragment_fields() {
        let packet = Ipv4Builder::new()
            .more_fragments(true)
            .fragment_offset(16)
            .payload(vec![0; 8])
            .build();

        let header = Ipv4Header::parse(&packet).unwrap();
        assert!(header.more_fragments);
        assert_eq!(header.fragment_offset, 16);
        assert!(header.is_fragment());
    }

    #[test]
    fn test_offload_zero_total_length() {
        let mut packet = Ipv4Builder::new()
            .identification(7)
            .payload(vec![1, 2, 3, 4])
            .build();
        packet[2] = 0;
        packet[3] = 0;

        let header = Ipv4Header::parse(&packet).unwrap();
        assert_eq!(header.datagram_len, 24);
    }

    #[test]
    fn test_zero_length_and_identification_rejected() {
        let mut packet = Ipv4Builder::new().identification(0).build();
        packet[2] = 0;
        packet[3] = 0;
        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::InvalidField {
                field: "total_length",
                ..
            })
        ));
    }

    #[test]
    fn test_declared_length_past_buffer() {
        let mut packet = Ipv4Builder::new().payload(vec![0; 4]).build();
        packet[2..4].copy_from_slice(&100u16.to_be_bytes());
        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::PacketTooShort { needed: 100, .. })
        ));
    }

    #[test]
    fn test_offload_past_max_datagram_len() {
        let mut packet = Ipv4Builder::new().identification(9).build();
        packet[2] = 0;
        packet[3] = 0;
        packet.resize(70_000, 0);

        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::InvalidField {
                field: "total_length",
                ..
            })
        ));
    }

    #[test]
    fn test_total_length_shorter_than_header() {
        let mut packet = Ipv4Builder::new().payload(vec![0; 4]).build();
        packet[2..4].copy_from_slice(&10u16.to_be_bytes());
        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::InvalidField {
                field: "total_length",
                ..
            })
        ));
    }

    #[test]
    fn test_short_and_bad_ihl() {
        assert!(Ipv4Header::parse(&[0x45, 0, 0]).is_err());

        let mut packet = Ipv4Builder::new().build();
        packet[0] = 0x44;
        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::InvalidField { field: "ihl", .. })
        ));
    }

    #[test]
    fn test_wrong_version_and_truncated_options() {
        let mut packet = Ipv4Builder::new().build();
        packet[0] = 0x65;
        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::InvalidField { field: "header", .. })
        ));

        // IHL of 15 claims 60 header bytes but only 20 are present.
        packet[0] = 0x4f;
        assert!(matches!(
            Ipv4Header::parse(&packet),
            Err(ProtocolError::PacketTooShort { needed: 60, .. })
        ));
    }

    #[test]
    fn test_ipv6_length() {
        let mut packet = vec![0u8; 48];
        packet[0] = 0x60;
        packet[4..6].copy_from_slice(&8u16.to_be_bytes());
        assert_eq!(ipv6_datagram_len(&packet), Ok(48));

        packet[4..6].copy_from_slice(&9u16.to_be_bytes());
        assert!(ipv6_datagram_len(&packet).is_err());
        assert!(ipv6_datagram_len(&packet[..10]).is_err());
    }

    #[test]
    fn test_fragment_payload() {
        let packet = Ipv4Builder::new().payload(vec![9, 8, 7]).build();
        let header = Ipv4Header::parse(&packet).unwrap();
        let fragment = Fragment::new(header, &packet);
        assert_eq!(fragment.payload(), &[9, 8, 7]);
        assert_eq!(fragment.into_payload(), vec![9, 8, 7]);
    }
}
