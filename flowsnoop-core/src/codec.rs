//! Bundle body codecs.
//!
//! Store and deflate are built in. The proprietary codec is supplied by the
//! embedding application as a [`VendorCodec`]; each flow direction owns a
//! [`VendorSession`] holding the codec's persistent state and shared
//! dictionary, seeded once and reused for every frame.

use std::io::Read;
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use tracing::debug;

use crate::error::CodecError;

/// Length of the zlib wrapper that precedes the raw deflate stream.
const ZLIB_HEADER_LEN: usize = 2;

/// The proprietary decompressor, provided by the embedding application.
///
/// The codec owns no memory; the session allocates `state_size()` bytes
/// of per-session state and `shared_dictionary_size()` bytes of shared
/// dictionary and passes them back on every call.
pub trait VendorCodec: Send + Sync {
    fn state_size(&self) -> usize;

    fn shared_dictionary_size(&self, hash_bits: u32) -> usize;

    /// Load a training window into the shared dictionary.
    fn set_window(&self, shared: &mut [u8], hash_bits: u32, window: &[u8]);

    /// Train the per-session state against the shared dictionary.
    fn train(&self, state: &mut [u8], shared: &[u8], samples: &[&[u8]]);

    /// Decode `compressed` into `raw`, which is sized to the declared
    /// uncompressed length. Returns false on failure.
    fn decode(&self, state: &mut [u8], shared: &[u8], compressed: &[u8], raw: &mut [u8])
        -> bool;
}

/// Persistent vendor codec state for one stream direction.
pub struct VendorSession {
    codec: Arc<dyn VendorCodec>,
    state: Vec<u8>,
    shared: Vec<u8>,
}

impl VendorSession {
    /// Allocate and seed the session: an empty training window and no
    /// samples.
    pub fn new(codec: Arc<dyn VendorCodec>, hash_bits: u32) -> Self {
        let mut shared = vec![0u8; codec.shared_dictionary_size(hash_bits)];
        codec.set_window(&mut shared, hash_bits, &[]);

        let mut state = vec![0u8; codec.state_size()];
        codec.train(&mut state, &shared, &[]);

        debug!(
            state_len = state.len(),
            shared_len = shared.len(),
            hash_bits,
            "vendor codec session seeded"
        );

        Self {
            codec,
            state,
            shared,
        }
    }

    fn decode(&mut self, compressed: &[u8], raw_len: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
        out.clear();
        out.resize(raw_len, 0);
        if self
            .codec
            .decode(&mut self.state, &self.shared, compressed, out)
        {
            Ok(())
        } else {
            out.clear();
            Err(CodecError::VendorDecodeFailed {
                compressed: compressed.len(),
                expected: raw_len,
            })
        }
    }
}

impl std::fmt::Debug for VendorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorSession")
            .field("state_len", &self.state.len())
            .field("shared_len", &self.shared.len())
            .finish()
    }
}

/// The codec selected for one frame body.
#[derive(Debug)]
pub enum BodyCodec<'a> {
    Store,
    Deflate,
    Vendor(&'a mut VendorSession),
}

impl BodyCodec<'_> {
    /// Decode `body` into `out`, replacing its contents, and return the
    /// decoded length.
    ///
    /// `declared_len` is the sender's uncompressed length and sizes the
    /// vendor output; `limit` caps the output of every codec.
    pub fn decode(
        self,
        body: &[u8],
        declared_len: usize,
        limit: usize,
        out: &mut Vec<u8>,
    ) -> Result<usize, CodecError> {
        out.clear();
        match self {
            BodyCodec::Store => {
                if body.len() > limit {
                    return Err(CodecError::OversizedOutput { limit });
                }
                out.extend_from_slice(body);
            }
            BodyCodec::Deflate => {
                let stream = body
                    .get(ZLIB_HEADER_LEN..)
                    .ok_or(CodecError::BodyTooShort {
                        needed: ZLIB_HEADER_LEN,
                        have: body.len(),
                    })?;
                // One byte past the limit tells an exact fit from overflow.
                DeflateDecoder::new(stream)
                    .take(limit as u64 + 1)
                    .read_to_end(out)
                    .map_err(CodecError::Inflate)?;
                if out.len() > limit {
                    out.clear();
                    return Err(CodecError::OversizedOutput { limit });
                }
            }
            BodyCodec::Vendor(session) => {
                if declared_len > limit {
                    return Err(CodecError::OversizedOutput { limit });
                }
                session.decode(body, declared_len, out)?;
            }
        }
        Ok(out.len())
    }
}
