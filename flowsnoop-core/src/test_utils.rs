//! Test utilities for the reassembly pipeline.
//!
//! Provides builders for constructing IPv4 datagrams, TCP segments and
//! application bundles with exactly the byte layouts the engines read.

use std::io::Write;

use flate2::write::ZlibEncoder;

use crate::bundle::{Compression, BUNDLE_HEADER_LEN, BUNDLE_MAGIC};

/// Builder for constructing IPv4 datagrams.
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    identification: u16,
    more_fragments: bool,
    fragment_offset: u16,
    ttl: u8,
    protocol: u8,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    payload: Vec<u8>,
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self {
            identification: 0x0001,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: 6, // TCP
            src_ip: [192, 168, 1, 1],
            dst_ip: [192, 168, 1, 2],
            payload: Vec::new(),
        }
    }
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn more_fragments(mut self, more: bool) -> Self {
        self.more_fragments = more;
        self
    }

    /// Fragment offset in bytes; must be a multiple of 8.
    pub fn fragment_offset(mut self, offset: u16) -> Self {
        self.fragment_offset = offset;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn udp(self) -> Self {
        self.protocol(17)
    }

    pub fn src_ip(mut self, ip: [u8; 4]) -> Self {
        self.src_ip = ip;
        self
    }

    pub fn dst_ip(mut self, ip: [u8; 4]) -> Self {
        self.dst_ip = ip;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = 20 + self.payload.len() as u16;
        let mut flags_fragment = self.fragment_offset / 8;
        if self.more_fragments {
            flags_fragment |= 0x2000;
        }

        let mut header = Vec::with_capacity(20 + self.payload.len());
        header.push(0x45); // Version 4, IHL 5
        header.push(0x00);
        header.extend_from_slice(&total_length.to_be_bytes());
        header.extend_from_slice(&self.identification.to_be_bytes());
        header.extend_from_slice(&flags_fragment.to_be_bytes());
        header.push(self.ttl);
        header.push(self.protocol);
        header.extend_from_slice(&[0x00, 0x00]); // Checksum (not calculated)
        header.extend_from_slice(&self.src_ip);
        header.extend_from_slice(&self.dst_ip);
        header.extend_from_slice(&self.payload);

        header
    }

    /// Split the payload into fragments carrying at most `chunk` bytes each
    /// (`chunk` is rounded down to a multiple of 8).
    pub fn fragments(self, chunk: usize) -> Vec<Vec<u8>> {
        let chunk = (chunk / 8).max(1) * 8;
        let payload = self.payload.clone();
        let count = payload.len().div_ceil(chunk).max(1);

        (0..count)
            .map(|i| {
                let start = i * chunk;
                let end = (start + chunk).min(payload.len());
                self.clone()
                    .fragment_offset(start as u16)
                    .more_fragments(i + 1 < count)
                    .payload(payload[start..end].to_vec())
                    .build()
            })
            .collect()
    }
}

/// Builder for constructing TCP segments.
#[derive(Debug, Clone)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    data_offset: u8,
    flags: u8,
    window: u16,
    payload: Vec<u8>,
}

impl Default for TcpBuilder {
    fn default() -> Self {
        Self {
            src_port: 50000,
            dst_port: 7000,
            seq: 1,
            ack: 0,
            data_offset: 5, // 20 bytes
            flags: 0x10,    // ACK
            window: 65535,
            payload: Vec::new(),
        }
    }
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn syn(self) -> Self {
        self.flags(0x02)
    }

    pub fn ack(self) -> Self {
        self.flags(0x10)
    }

    pub fn psh_ack(self) -> Self {
        self.flags(0x18)
    }

    /// Pad the header with `words` 32-bit words of NOP options.
    pub fn options_words(mut self, words: u8) -> Self {
        self.data_offset = 5 + words;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let header_len = usize::from(self.data_offset) * 4;
        let mut segment = Vec::with_capacity(header_len + self.payload.len());

        segment.extend_from_slice(&self.src_port.to_be_bytes());
        segment.extend_from_slice(&self.dst_port.to_be_bytes());
        segment.extend_from_slice(&self.seq.to_be_bytes());
        segment.extend_from_slice(&self.ack.to_be_bytes());
        segment.push(self.data_offset << 4);
        segment.push(self.flags);
        segment.extend_from_slice(&self.window.to_be_bytes());
        segment.extend_from_slice(&[0x00, 0x00]); // Checksum
        segment.extend_from_slice(&[0x00, 0x00]); // Urgent pointer
        segment.resize(header_len, 0x01); // NOP options
        segment.extend_from_slice(&self.payload);

        segment
    }
}

/// Builder for constructing application bundles.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    epoch_ms: u64,
    channel: u16,
    compression: u8,
    message_count: Option<u16>,
    messages: Vec<Vec<u8>>,
    body_override: Option<Vec<u8>>,
    uncompressed_len_override: Option<u32>,
}

impl Default for BundleBuilder {
    fn default() -> Self {
        Self {
            epoch_ms: 1_700_000_000_000,
            channel: 1,
            compression: Compression::None.type_byte(),
            message_count: None,
            messages: Vec::new(),
            body_override: None,
            uncompressed_len_override: None,
        }
    }
}

impl BundleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch_ms(mut self, epoch_ms: u64) -> Self {
        self.epoch_ms = epoch_ms;
        self
    }

    pub fn channel(mut self, channel: u16) -> Self {
        self.channel = channel;
        self
    }

    pub fn compression(mut self, compression: u8) -> Self {
        self.compression = compression;
        self
    }

    pub fn deflate(self) -> Self {
        self.compression(Compression::Deflate.type_byte())
    }

    pub fn message(mut self, message: &[u8]) -> Self {
        self.messages.push(message.to_vec());
        self
    }

    /// Declare a message count different from the number of records.
    pub fn message_count(mut self, count: u16) -> Self {
        self.message_count = Some(count);
        self
    }

    /// Use `body` verbatim as the frame body instead of encoding the
    /// records.
    pub fn raw_body(mut self, body: Vec<u8>, uncompressed_len: u32) -> Self {
        self.body_override = Some(body);
        self.uncompressed_len_override = Some(uncompressed_len);
        self
    }

    /// The decoded body: every record with its length prefix.
    pub fn records(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for message in &self.messages {
            out.extend_from_slice(&(message.len() as u16).to_le_bytes());
            out.extend_from_slice(message);
        }
        out
    }

    pub fn build(self) -> Vec<u8> {
        let records = self.records();
        let (body, uncompressed_len) = match self.body_override {
            Some(body) => (body, self.uncompressed_len_override.unwrap_or(0)),
            None if self.compression == Compression::Deflate.type_byte() => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(&records).expect("in-memory write");
                (encoder.finish().expect("in-memory write"), records.len() as u32)
            }
            None => (records.clone(), records.len() as u32),
        };

        let count = self
            .message_count
            .unwrap_or(self.messages.len() as u16);
        let total_len = (BUNDLE_HEADER_LEN + body.len()) as u32;

        let mut frame = Vec::with_capacity(BUNDLE_HEADER_LEN + body.len());
        frame.extend_from_slice(&BUNDLE_MAGIC.to_le_bytes());
        frame.extend_from_slice(&[0u8; 12]); // Remaining magic words
        frame.extend_from_slice(&((self.epoch_ms >> 32) as u32).to_le_bytes());
        frame.extend_from_slice(&(self.epoch_ms as u32).to_le_bytes());
        frame.extend_from_slice(&total_len.to_le_bytes());
        frame.extend_from_slice(&self.channel.to_le_bytes());
        frame.extend_from_slice(&count.to_le_bytes());
        frame.push(1); // Version
        frame.push(self.compression);
        frame.extend_from_slice(&[0x00, 0x00]); // Reserved
        frame.extend_from_slice(&uncompressed_len.to_le_bytes());
        frame.extend_from_slice(&body);

        frame
    }
}
