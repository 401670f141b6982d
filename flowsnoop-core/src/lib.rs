//! # flowsnoop-core
//!
//! Passive reconstruction of an application message stream from raw IP
//! captures.
//!
//! The crate observes traffic it does not take part in: it never sends,
//! never acknowledges and cannot ask for retransmission. From captured IPv4
//! datagrams it rebuilds the byte stream one TCP direction carried, frames
//! that stream into bundles, decompresses them and splits them into
//! application messages.
//!
//! ## Features
//!
//! - **IP Reassembly**: Per-flow IPv4 fragment reassembly with stale group
//!   purging and length-offload tolerance
//! - **TCP Reassembly**: Sequence-ordered stream rebuilding with retransmit
//!   suppression, SYN resync and a desync timeout
//! - **Bundle Decoding**: Magic-resynchronising framing with store, deflate
//!   and injected vendor codecs
//! - **Flow Registry**: Send and receive pipelines per discovered connection
//!
//! ## Quick Start
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use flowsnoop_core::flow::FlowPipeline;
//! use flowsnoop_core::ip::IpTriplet;
//! use flowsnoop_core::tcp::PortPair;
//!
//! let mut pipeline = FlowPipeline::new(
//!     IpTriplet::new(Ipv4Addr::new(203, 0, 113, 7), Ipv4Addr::new(10, 0, 0, 2), 6),
//!     PortPair::new(7000, 50000),
//! );
//!
//! // Feed captured datagrams as they arrive...
//! let capture: Vec<u8> = Vec::new();
//! pipeline.ingest(&capture, capture.len());
//!
//! // ...and take messages as they are decoded.
//! while let Some(message) = pipeline.next_message() {
//!     println!("{} bytes at {:?}", message.payload.len(), message.timestamp());
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        flowsnoop-core                               |
//! +---------------------------------------------------------------------+
//! |  ip/       - IPv4 header reader, fragment pool, IpReassembler       |
//! |  tcp/      - TCP segment reader, segment pool, TcpReassembler       |
//! |  bundle/   - Bundle header, BundleDecoder, Message                  |
//! |  codec     - Store/deflate codecs, VendorCodec capability           |
//! |  flow/     - FlowPipeline, FlowRegistry, CaptureQueue               |
//! |  config    - PipelineConfig and default thresholds                  |
//! |  wire      - Bounds-checked field readers                           |
//! |  error     - Error types                                            |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Crate Features
//!
//! - `test-utils` - Packet and bundle builders for tests and fuzzing

pub mod bundle;
pub mod codec;
pub mod config;
pub mod error;
pub mod flow;
pub mod ip;
pub mod tcp;
pub mod wire;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export commonly used types at crate root for convenience
pub use bundle::{BundleDecoder, Message};
pub use codec::{VendorCodec, VendorSession};
pub use config::PipelineConfig;
pub use error::{CodecError, Error, ProtocolError, Result};
pub use flow::{CaptureQueue, Direction, FlowDiscovery, FlowKey, FlowPipeline, FlowRegistry};
pub use ip::IpReassembler;
pub use tcp::TcpReassembler;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
