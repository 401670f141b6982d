use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::{CaptureQueue, Direction, FlowKey, FlowPipeline};
use crate::bundle::Message;
use crate::codec::VendorCodec;
use crate::config::PipelineConfig;

/// Source of the connections that should currently be observed.
pub trait FlowDiscovery {
    /// Snapshot of the open connections. A connection missing from the
    /// snapshot is considered closed.
    fn active_flows(&self) -> Vec<FlowKey>;
}

impl<F> FlowDiscovery for F
where
    F: Fn() -> Vec<FlowKey>,
{
    fn active_flows(&self) -> Vec<FlowKey> {
        self()
    }
}

/// Connections opened and closed by one [`FlowRegistry::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowChanges {
    pub opened: Vec<FlowKey>,
    pub closed: Vec<FlowKey>,
}

impl FlowChanges {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

#[derive(Debug)]
struct FlowEntry {
    send: FlowPipeline,
    receive: FlowPipeline,
}

impl FlowEntry {
    fn pipeline_mut(&mut self, direction: Direction) -> &mut FlowPipeline {
        match direction {
            Direction::Send => &mut self.send,
            Direction::Receive => &mut self.receive,
        }
    }
}

/// Send and receive pipelines for every observed connection.
pub struct FlowRegistry {
    flows: HashMap<FlowKey, FlowEntry>,
    config: PipelineConfig,
    vendor: Option<Arc<dyn VendorCodec>>,
}

impl FlowRegistry {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            flows: HashMap::new(),
            config,
            vendor: None,
        }
    }

    /// Decode vendor-compressed bundles with `codec`. Applies to flows
    /// opened afterwards.
    pub fn with_vendor_codec(mut self, codec: Arc<dyn VendorCodec>) -> Self {
        self.vendor = Some(codec);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start observing a connection. Returns false if it was already open.
    pub fn open(&mut self, key: FlowKey) -> bool {
        if self.flows.contains_key(&key) {
            return false;
        }

        let entry = FlowEntry {
            send: FlowPipeline::for_flow(&key, Direction::Send, &self.config, self.vendor.clone()),
            receive: FlowPipeline::for_flow(
                &key,
                Direction::Receive,
                &self.config,
                self.vendor.clone(),
            ),
        };
        self.flows.insert(key, entry);
        info!(flow = %key, "flow opened");
        true
    }

    /// Stop observing a connection and discard its state.
    pub fn close(&mut self, key: &FlowKey) -> bool {
        match self.flows.remove(key) {
            Some(_) => {
                info!(flow = %key, "flow closed");
                true
            }
            None => false,
        }
    }

    /// Open newly reported connections and close the ones no longer
    /// reported.
    pub fn sync(&mut self, discovery: &dyn FlowDiscovery) -> FlowChanges {
        let active: HashSet<FlowKey> = discovery.active_flows().into_iter().collect();
        let mut changes = FlowChanges::default();

        let mut stale: Vec<FlowKey> = self
            .flows
            .keys()
            .filter(|key| !active.contains(*key))
            .copied()
            .collect();
        stale.sort();
        for key in stale {
            self.close(&key);
            changes.closed.push(key);
        }

        let mut fresh: Vec<FlowKey> = active.into_iter().collect();
        fresh.sort();
        for key in fresh {
            if self.open(key) {
                changes.opened.push(key);
            }
        }

        if !changes.is_empty() {
            debug!(
                opened = changes.opened.len(),
                closed = changes.closed.len(),
                active = self.flows.len(),
                "flow set synchronised"
            );
        }
        changes
    }

    /// Offer a capture buffer to every pipeline; each keeps only its own
    /// traffic.
    pub fn ingest(&mut self, buffer: &[u8], usable_len: usize) {
        self.ingest_at(buffer, usable_len, Instant::now());
    }

    /// [`ingest`](Self::ingest) with an explicit acceptance time.
    pub fn ingest_at(&mut self, buffer: &[u8], usable_len: usize, now: Instant) {
        for entry in self.flows.values_mut() {
            entry.send.ingest_at(buffer, usable_len, now);
            entry.receive.ingest_at(buffer, usable_len, now);
        }
    }

    /// Ingest everything waiting in `queue`. Returns the number of buffers
    /// processed.
    pub fn process_capture(&mut self, queue: &CaptureQueue) -> usize {
        let now = Instant::now();
        let captures = queue.drain();
        for capture in &captures {
            self.ingest_at(&capture.data, capture.usable_len, now);
        }
        captures.len()
    }

    /// Drive every pipeline without new input so stalled streams can time
    /// out.
    pub fn poll_at(&mut self, now: Instant) {
        for entry in self.flows.values_mut() {
            entry.send.poll_at(now);
            entry.receive.poll_at(now);
        }
    }

    /// Take every message decoded so far for one direction of a flow.
    pub fn drain_messages(&mut self, key: &FlowKey, direction: Direction) -> Vec<Message> {
        match self.flows.get_mut(key) {
            Some(entry) => {
                let pipeline = entry.pipeline_mut(direction);
                std::iter::from_fn(|| pipeline.next_message()).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn pipeline(&self, key: &FlowKey, direction: Direction) -> Option<&FlowPipeline> {
        self.flows.get(key).map(|entry| match direction {
            Direction::Send => &entry.send,
            Direction::Receive => &entry.receive,
        })
    }

    pub fn contains(&self, key: &FlowKey) -> bool {
        self.flows.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FlowKey> {
        self.flows.keys()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.flows.len())
            .field("config", &self.config)
            .field("vendor", &self.vendor.is_some())
            .finish()
    }
}
