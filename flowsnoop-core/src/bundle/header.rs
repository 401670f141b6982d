use crate::error::ProtocolError;
use crate::wire::{le_u16, le_u32, u8_at};

/// First magic word of every bundle header.
pub const BUNDLE_MAGIC: u32 = 0x41A0_5252;

/// Fixed size of a bundle header.
pub const BUNDLE_HEADER_LEN: usize = 40;

/// Byte offsets within the bundle header.
mod offset {
    pub const MAGIC: usize = 0;
    pub const EPOCH_HIGH: usize = 16;
    pub const EPOCH_LOW: usize = 20;
    pub const TOTAL_LEN: usize = 24;
    pub const CHANNEL: usize = 28;
    pub const MESSAGE_COUNT: usize = 30;
    pub const VERSION: usize = 32;
    pub const COMPRESSION: usize = 33;
    pub const UNCOMPRESSED_LEN: usize = 36;
}

/// Body compression scheme named by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Store,
    /// zlib-framed deflate.
    Deflate,
    /// The proprietary codec; carries the raw type byte.
    Vendor(u8),
}

impl Compression {
    pub fn from_type_byte(value: u8) -> Self {
        match value {
            0 => Compression::None,
            1 => Compression::Store,
            2 => Compression::Deflate,
            other => Compression::Vendor(other),
        }
    }

    pub fn type_byte(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Store => 1,
            Compression::Deflate => 2,
            Compression::Vendor(value) => *value,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Store => write!(f, "store"),
            Compression::Deflate => write!(f, "deflate"),
            Compression::Vendor(value) => write!(f, "vendor({value})"),
        }
    }
}

/// Parsed bundle header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleHeader {
    pub magic: u32,
    /// Sender wall clock in milliseconds since the Unix epoch.
    pub epoch_ms: u64,
    /// Frame length, header included.
    pub total_len: u32,
    pub channel: u16,
    pub message_count: u16,
    pub version: u8,
    pub compression: Compression,
    /// Body length after decompression, as declared by the sender.
    pub uncompressed_len: u32,
}

impl BundleHeader {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < BUNDLE_HEADER_LEN {
            return Err(ProtocolError::too_short(
                "bundle",
                BUNDLE_HEADER_LEN,
                data.len(),
            ));
        }

        let read32 = |at| le_u32(data, at).unwrap_or_default();
        let read16 = |at| le_u16(data, at).unwrap_or_default();

        // The timestamp is two little-endian words, high word first.
        let epoch_ms =
            (u64::from(read32(offset::EPOCH_HIGH)) << 32) | u64::from(read32(offset::EPOCH_LOW));

        Ok(Self {
            magic: read32(offset::MAGIC),
            epoch_ms,
            total_len: read32(offset::TOTAL_LEN),
            channel: read16(offset::CHANNEL),
            message_count: read16(offset::MESSAGE_COUNT),
            version: u8_at(data, offset::VERSION).unwrap_or_default(),
            compression: Compression::from_type_byte(
                u8_at(data, offset::COMPRESSION).unwrap_or_default(),
            ),
            uncompressed_len: read32(offset::UNCOMPRESSED_LEN),
        })
    }

    pub fn has_magic(&self) -> bool {
        self.magic == BUNDLE_MAGIC
    }

    pub fn frame_len(&self) -> usize {
        self.total_len as usize
    }
}

/// An all-zero header region is stream padding, not a corrupt frame.
pub fn is_padding(header: &[u8]) -> bool {
    header.iter().all(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::BundleBuilder;

    #[test]
    fn test_parse_header() {
        let frame = BundleBuilder::new()
            .epoch_ms(0x0000_0123_4567_89ab)
            .channel(3)
            .message(b"abc")
            .build();

        let header = BundleHeader::parse(&frame).unwrap();
        assert!(header.has_magic());
        assert_eq!(header.epoch_ms, 0x0000_0123_4567_89ab);
        assert_eq!(header.frame_len(), BUNDLE_HEADER_LEN + 5);
        assert_eq!(header.channel, 3);
        assert_eq!(header.message_count, 1);
        assert_eq!(header.version, 1);
        assert_eq!(header.compression, Compression::None);
        assert_eq!(header.uncompressed_len, 5);
    }

    #[test]
    fn test_magic_byte_order() {
        let frame = BundleBuilder::new().build();
        assert_eq!(&frame[..4], &[0x52, 0x52, 0xa0, 0x41]);
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            BundleHeader::parse(&[0u8; 39]),
            Err(ProtocolError::PacketTooShort { needed: 40, have: 39, .. })
        ));
    }

    #[test]
    fn test_compression_types() {
        assert_eq!(Compression::from_type_byte(0), Compression::None);
        assert_eq!(Compression::from_type_byte(1), Compression::Store);
        assert_eq!(Compression::from_type_byte(2), Compression::Deflate);
        assert_eq!(Compression::from_type_byte(4), Compression::Vendor(4));
        assert_eq!(Compression::Vendor(4).type_byte(), 4);
        assert_eq!(Compression::Vendor(4).to_string(), "vendor(4)");
    }

    #[test]
    fn test_padding() {
        assert!(is_padding(&[0u8; BUNDLE_HEADER_LEN]));
        let mut header = [0u8; BUNDLE_HEADER_LEN];
        header[39] = 1;
        assert!(!is_padding(&header));
    }
}
