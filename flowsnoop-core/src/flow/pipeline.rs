use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use super::{Direction, FlowKey};
use crate::bundle::{BundleDecoder, Message};
use crate::codec::{VendorCodec, VendorSession};
use crate::config::PipelineConfig;
use crate::ip::{IpReassembler, IpTriplet};
use crate::tcp::{PortPair, TcpReassembler};

/// One flow direction: raw datagrams in, application messages out.
#[derive(Debug)]
pub struct FlowPipeline {
    ip: IpReassembler,
    tcp: TcpReassembler,
    bundles: BundleDecoder,
}

impl FlowPipeline {
    pub fn new(triplet: IpTriplet, ports: PortPair) -> Self {
        Self::with_config(triplet, ports, &PipelineConfig::default(), None)
    }

    pub fn with_config(
        triplet: IpTriplet,
        ports: PortPair,
        config: &PipelineConfig,
        vendor: Option<Arc<dyn VendorCodec>>,
    ) -> Self {
        let mut bundles = BundleDecoder::new()
            .with_max_frame_len(config.max_frame_len)
            .with_max_decoded_len(config.max_decoded_len);
        if let Some(codec) = vendor {
            bundles = bundles.with_vendor(VendorSession::new(codec, config.vendor_hash_bits));
        }

        Self {
            ip: IpReassembler::new(triplet).with_stale_window(config.stale_fragment_window),
            tcp: TcpReassembler::new(ports)
                .with_desync_timeout(config.desync_timeout)
                .with_syn_jump_limit(config.syn_jump_limit),
            bundles,
        }
    }

    /// Pipeline for one direction of a discovered connection.
    pub fn for_flow(
        key: &FlowKey,
        direction: Direction,
        config: &PipelineConfig,
        vendor: Option<Arc<dyn VendorCodec>>,
    ) -> Self {
        Self::with_config(key.triplet(direction), key.ports(direction), config, vendor)
    }

    /// Feed a capture buffer through every stage. Returns the number of
    /// stream bytes handed to the bundle decoder.
    pub fn ingest(&mut self, buffer: &[u8], usable_len: usize) -> usize {
        self.ingest_at(buffer, usable_len, Instant::now())
    }

    /// [`ingest`](Self::ingest) with an explicit acceptance time.
    pub fn ingest_at(&mut self, buffer: &[u8], usable_len: usize, now: Instant) -> usize {
        self.ip.filter_and_store(buffer, usable_len);
        self.poll_at(now)
    }

    /// Drive the stages without new input, so a stalled stream can reach
    /// its desync timeout.
    pub fn poll_at(&mut self, now: Instant) -> usize {
        while let Some(payload) = self.ip.next_payload() {
            self.tcp.filter_and_store_at(&payload, now);
        }

        let mut delivered = 0;
        while let Some(stream) = self.tcp.next_datagram_at(now) {
            delivered += stream.len();
            self.bundles.store_data(&stream);
        }

        if delivered > 0 {
            trace!(
                delivered,
                queued = self.bundles.queued(),
                "stream bytes delivered"
            );
        }
        delivered
    }

    pub fn next_message(&mut self) -> Option<Message> {
        self.bundles.next_message()
    }

    pub fn ip(&self) -> &IpReassembler {
        &self.ip
    }

    pub fn tcp(&self) -> &TcpReassembler {
        &self.tcp
    }

    pub fn bundles(&self) -> &BundleDecoder {
        &self.bundles
    }
}
