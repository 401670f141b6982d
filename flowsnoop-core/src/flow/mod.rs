//! Per-connection wiring of the reassembly stages.
//!
//! ## Components
//!
//! - [`FlowPipeline`] - One direction: IP reassembly, TCP reassembly and
//!   bundle decoding chained together
//! - [`FlowRegistry`] - Maps each discovered connection to a send and a
//!   receive pipeline
//! - [`FlowDiscovery`] - Source of the connections currently open
//! - [`CaptureQueue`] - Handoff from the capture thread to the pipelines
//!
//! ## Example
//!
//! ```rust
//! use std::net::{Ipv4Addr, SocketAddrV4};
//! use flowsnoop_core::config::PipelineConfig;
//! use flowsnoop_core::flow::{CaptureQueue, Direction, FlowKey, FlowRegistry};
//!
//! let key = FlowKey::new(
//!     SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 50000),
//!     SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 7), 7000),
//! );
//!
//! let queue = CaptureQueue::new();
//! let mut registry = FlowRegistry::new(PipelineConfig::default());
//! registry.open(key);
//!
//! // The capture thread pushes raw IP datagrams...
//! queue.push(Vec::new());
//!
//! // ...and the worker drains them into the pipelines.
//! registry.process_capture(&queue);
//! let messages = registry.drain_messages(&key, Direction::Receive);
//! assert!(messages.is_empty());
//! ```

mod capture;
mod pipeline;
mod registry;

use std::fmt;
use std::net::SocketAddrV4;

pub use capture::{Capture, CaptureQueue, DEFAULT_CAPTURE_QUEUE_LEN};
pub use pipeline::FlowPipeline;
pub use registry::{FlowChanges, FlowDiscovery, FlowRegistry};

use crate::ip::IpTriplet;
use crate::tcp::PortPair;

/// IP protocol number for TCP.
pub const IPPROTO_TCP: u8 = 6;

/// Which way traffic travels relative to the observed host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local endpoint to remote peer.
    Send,
    /// Remote peer to local endpoint.
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "send"),
            Direction::Receive => write!(f, "receive"),
        }
    }
}

/// One OS-level TCP connection, as reported by flow discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub local: SocketAddrV4,
    pub remote: SocketAddrV4,
}

impl FlowKey {
    pub fn new(local: SocketAddrV4, remote: SocketAddrV4) -> Self {
        Self { local, remote }
    }

    /// Address filter for the given direction.
    pub fn triplet(&self, direction: Direction) -> IpTriplet {
        let (source, destination) = self.endpoints(direction);
        IpTriplet::new(*source.ip(), *destination.ip(), IPPROTO_TCP)
    }

    /// Port filter for the given direction.
    pub fn ports(&self, direction: Direction) -> PortPair {
        let (source, destination) = self.endpoints(direction);
        PortPair::new(source.port(), destination.port())
    }

    fn endpoints(&self, direction: Direction) -> (SocketAddrV4, SocketAddrV4) {
        match direction {
            Direction::Send => (self.local, self.remote),
            Direction::Receive => (self.remote, self.local),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}
