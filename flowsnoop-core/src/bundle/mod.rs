//! Bundle framing over the reassembled byte stream.
//!
//! The receive direction carries bundles: a 40-byte header followed by a
//! body that may be compressed. The decompressed body is a run of
//! length-prefixed records, one per application message.
//!
//! ```text
//! offset  size  field
//!      0     4  magic 0x41A05252 (little-endian)
//!      4    12  further magic words (ignored)
//!     16     4  epoch ms, high word
//!     20     4  epoch ms, low word
//!     24     4  total length, header included
//!     28     2  channel
//!     30     2  message count
//!     32     1  version
//!     33     1  compression type
//!     34     2  reserved
//!     36     4  uncompressed body length
//! ```
//!
//! All multi-byte fields are little-endian.

mod decoder;
mod header;

pub use decoder::{BundleDecoder, BundleStats, Message};
pub use header::{is_padding, BundleHeader, Compression, BUNDLE_HEADER_LEN, BUNDLE_MAGIC};
