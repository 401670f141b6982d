use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::header::{is_padding, BundleHeader, Compression, BUNDLE_HEADER_LEN, BUNDLE_MAGIC};
use crate::codec::{BodyCodec, VendorSession};
use crate::config::{DEFAULT_MAX_DECODED_LEN, DEFAULT_MAX_FRAME_LEN};
use crate::error::{CodecError, Error, ProtocolError, Result};
use crate::wire;

/// One application message cut from a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender clock of the enclosing bundle, milliseconds since the epoch.
    pub epoch_ms: u64,
    pub channel: u16,
    /// Message bytes, without the length prefix.
    pub payload: Bytes,
}

impl Message {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.epoch_ms)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }
}

/// Counters kept by the bundle decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleStats {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub padding_skipped: u64,
    pub magic_resyncs: u64,
    pub buffer_resets: u64,
    pub messages_queued: u64,
}

/// Frames the reassembled byte stream into bundles and splits them into
/// messages.
#[derive(Debug)]
pub struct BundleDecoder {
    buffer: BytesMut,
    decoded: Vec<u8>,
    messages: VecDeque<Message>,
    vendor: Option<VendorSession>,
    max_frame_len: usize,
    max_decoded_len: usize,
    stats: BundleStats,
}

impl Default for BundleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            decoded: Vec::new(),
            messages: VecDeque::new(),
            vendor: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_decoded_len: DEFAULT_MAX_DECODED_LEN,
            stats: BundleStats::default(),
        }
    }

    /// Frames declaring more than `max_frame_len` bytes are treated as
    /// corrupt.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.max(BUNDLE_HEADER_LEN);
        self
    }

    pub fn with_max_decoded_len(mut self, max_decoded_len: usize) -> Self {
        self.max_decoded_len = max_decoded_len;
        self
    }

    pub fn with_vendor(mut self, session: VendorSession) -> Self {
        self.vendor = Some(session);
        self
    }

    pub fn stats(&self) -> &BundleStats {
        &self.stats
    }

    /// Bytes received but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Messages decoded but not yet taken.
    pub fn queued(&self) -> usize {
        self.messages.len()
    }

    /// Append reassembled stream bytes and decode every complete bundle.
    pub fn store_data(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(data);
        self.drain_frames();
    }

    pub fn next_message(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    fn drain_frames(&mut self) {
        while self.buffer.len() >= BUNDLE_HEADER_LEN {
            let header = match BundleHeader::parse(&self.buffer) {
                Ok(header) => header,
                Err(_) => break,
            };

            if !header.has_magic() {
                if is_padding(&self.buffer[..BUNDLE_HEADER_LEN]) {
                    trace!("skipping zero padding");
                    self.buffer.advance(BUNDLE_HEADER_LEN);
                    self.stats.padding_skipped += 1;
                    continue;
                }
                if !self.resync() {
                    break;
                }
                continue;
            }

            let frame_len = header.frame_len();
            if frame_len < BUNDLE_HEADER_LEN || frame_len > self.max_frame_len {
                warn!(
                    frame_len,
                    max_frame_len = self.max_frame_len,
                    "implausible bundle length, searching for next frame"
                );
                self.stats.frames_dropped += 1;
                // Step past this magic so the search finds the next one.
                self.buffer.advance(1);
                continue;
            }

            if self.buffer.len() < frame_len {
                trace!(
                    frame_len,
                    buffered = self.buffer.len(),
                    "waiting for rest of bundle"
                );
                break;
            }

            let frame = self.buffer.split_to(frame_len).freeze();
            match self.decode_frame(&header, &frame[BUNDLE_HEADER_LEN..]) {
                Ok(count) => {
                    self.stats.frames_decoded += 1;
                    self.stats.messages_queued += count as u64;
                    trace!(
                        channel = header.channel,
                        messages = count,
                        compression = %header.compression,
                        "bundle decoded"
                    );
                }
                Err(Error::Protocol(e)) => {
                    warn!(error = %e, "malformed bundle records, resetting receive buffer");
                    self.stats.frames_dropped += 1;
                    self.stats.buffer_resets += 1;
                    self.buffer.clear();
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        compression = %header.compression,
                        "dropping undecodable bundle"
                    );
                    self.stats.frames_dropped += 1;
                }
            }
        }
    }

    /// Skip to the next occurrence of the magic. Returns false when there
    /// is none and the buffer was discarded, apart from a trailing partial
    /// magic that the next delivery may complete.
    fn resync(&mut self) -> bool {
        let magic = BUNDLE_MAGIC.to_le_bytes();
        match wire::find(&self.buffer[1..], &magic) {
            Some(pos) => {
                debug!(skipped = pos + 1, "resynchronised on bundle magic");
                self.buffer.advance(pos + 1);
                self.stats.magic_resyncs += 1;
                true
            }
            None => {
                let kept = partial_magic_len(&self.buffer[1..], &magic);
                let discarded = self.buffer.len() - kept;
                warn!(discarded, kept, "no bundle magic in receive buffer, discarding");
                self.buffer.advance(discarded);
                self.stats.buffer_resets += 1;
                false
            }
        }
    }

    /// Decompress one body and queue its messages. Nothing is queued
    /// unless every record fits.
    fn decode_frame(&mut self, header: &BundleHeader, body: &[u8]) -> Result<usize> {
        let codec = match header.compression {
            Compression::None | Compression::Store => BodyCodec::Store,
            Compression::Deflate => BodyCodec::Deflate,
            Compression::Vendor(kind) => match self.vendor.as_mut() {
                Some(session) => BodyCodec::Vendor(session),
                None => return Err(CodecError::UnknownCompression(kind).into()),
            },
        };

        let len = codec.decode(
            body,
            header.uncompressed_len as usize,
            self.max_decoded_len,
            &mut self.decoded,
        )?;
        let decoded = Bytes::copy_from_slice(&self.decoded[..len]);

        let messages = split_records(&decoded, header)?;
        let count = messages.len();
        self.messages.extend(messages);
        Ok(count)
    }
}

/// Cut `message_count` length-prefixed records from a decoded body.
fn split_records(decoded: &Bytes, header: &BundleHeader) -> std::result::Result<Vec<Message>, ProtocolError> {
    let mut messages = Vec::with_capacity(usize::from(header.message_count));
    let mut offset = 0;

    for _ in 0..header.message_count {
        let len = wire::le_u16(decoded, offset)
            .ok_or_else(|| ProtocolError::too_short("bundle", offset + 2, decoded.len()))?;
        let start = offset + 2;
        let end = start + usize::from(len);
        if end > decoded.len() {
            return Err(ProtocolError::invalid(
                "bundle",
                "message_len",
                format!("record {start}..{end} overruns {} decoded bytes", decoded.len()),
            ));
        }

        messages.push(Message {
            epoch_ms: header.epoch_ms,
            channel: header.channel,
            payload: decoded.slice(start..end),
        });
        offset = end;
    }

    Ok(messages)
}

/// Length of the longest proper prefix of `magic` that ends `data`.
fn partial_magic_len(data: &[u8], magic: &[u8]) -> usize {
    let longest = data.len().min(magic.len() - 1);
    (1..=longest)
        .rev()
        .find(|&len| data.ends_with(&magic[..len]))
        .unwrap_or(0)
}
