//! Pipeline tuning knobs.
//!
//! The defaults are the thresholds the observed client traffic was tuned
//! against. They trade strict TCP correctness for recoverability, so change
//! them only with captures that show the need.

use std::time::Duration;

/// Identification distance past which incomplete fragment groups are purged.
pub const DEFAULT_STALE_FRAGMENT_WINDOW: u16 = 99;

/// Time without stream progress before a gapped TCP stream is resynchronised.
pub const DEFAULT_DESYNC_TIMEOUT: Duration = Duration::from_millis(2000);

/// Largest cursor jump a SYN may cause before it is treated as a replay.
pub const DEFAULT_SYN_JUMP_LIMIT: u32 = 100_000;

/// Largest bundle frame (header included) accepted from the stream.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Largest decoded bundle body accepted from any codec.
pub const DEFAULT_MAX_DECODED_LEN: usize = 16 * 1024 * 1024;

/// Hash table size (log2) used when seeding the vendor codec dictionary.
pub const DEFAULT_VENDOR_HASH_BITS: u32 = 19;

/// Configuration shared by every stage of a flow pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// IP fragments with an identification this far below the last completed
    /// group are dropped.
    pub stale_fragment_window: u16,
    /// Gap timeout for the TCP stream.
    pub desync_timeout: Duration,
    /// SYN resync plausibility threshold.
    pub syn_jump_limit: u32,
    /// Maximum bundle frame length.
    pub max_frame_len: usize,
    /// Maximum decoded body length.
    pub max_decoded_len: usize,
    /// Vendor codec dictionary hash bits.
    pub vendor_hash_bits: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stale_fragment_window: DEFAULT_STALE_FRAGMENT_WINDOW,
            desync_timeout: DEFAULT_DESYNC_TIMEOUT,
            syn_jump_limit: DEFAULT_SYN_JUMP_LIMIT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_decoded_len: DEFAULT_MAX_DECODED_LEN,
            vendor_hash_bits: DEFAULT_VENDOR_HASH_BITS,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_fragment_window(mut self, window: u16) -> Self {
        self.stale_fragment_window = window;
        self
    }

    pub fn with_desync_timeout(mut self, timeout: Duration) -> Self {
        self.desync_timeout = timeout;
        self
    }

    pub fn with_syn_jump_limit(mut self, limit: u32) -> Self {
        self.syn_jump_limit = limit;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn with_max_decoded_len(mut self, len: usize) -> Self {
        self.max_decoded_len = len;
        self
    }

    pub fn with_vendor_hash_bits(mut self, bits: u32) -> Self {
        self.vendor_hash_bits = bits;
        self
    }
}
