//! Error types for flowsnoop-core.
//!
//! This module provides structured error types for the header readers and
//! body codecs:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`ProtocolError`] - Errors from IP/TCP/bundle header parsing
//! - [`CodecError`] - Errors from bundle body decompression
//!
//! The reassembly engines never hand these to their callers. Captured
//! traffic is untrusted, so every error is logged where it is recovered from
//! and the engine goes back to waiting for more data.

use thiserror::Error;

/// Main error type for flowsnoop-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error while reading a wire header
    #[error("Protocol parse error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error while decoding a bundle body
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors related to header parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for the protocol header
    #[error("{protocol}: packet too short (need {needed} bytes, have {have})")]
    PacketTooShort {
        protocol: &'static str,
        needed: usize,
        have: usize,
    },

    /// Invalid header field value
    #[error("{protocol}: invalid {field}: {reason}")]
    InvalidField {
        protocol: &'static str,
        field: &'static str,
        reason: String,
    },
}

impl ProtocolError {
    pub(crate) fn too_short(protocol: &'static str, needed: usize, have: usize) -> Self {
        ProtocolError::PacketTooShort {
            protocol,
            needed,
            have,
        }
    }

    pub(crate) fn invalid(
        protocol: &'static str,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        ProtocolError::InvalidField {
            protocol,
            field,
            reason: reason.into(),
        }
    }
}

/// Errors related to bundle body decoding.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The deflate stream could not be inflated
    #[error("inflate failed: {0}")]
    Inflate(#[source] std::io::Error),

    /// The injected vendor codec reported failure
    #[error("vendor codec rejected frame ({compressed} bytes -> {expected} bytes)")]
    VendorDecodeFailed { compressed: usize, expected: usize },

    /// Compression type with no codec available
    #[error("unknown compression type {0}")]
    UnknownCompression(u8),

    /// Body shorter than the codec requires
    #[error("body too short for codec (need {needed} bytes, have {have})")]
    BodyTooShort { needed: usize, have: usize },

    /// Decoded output would exceed the configured cap
    #[error("decoded output exceeds {limit} bytes")]
    OversizedOutput { limit: usize },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::too_short("ipv4", 20, 7);
        assert_eq!(
            err.to_string(),
            "ipv4: packet too short (need 20 bytes, have 7)"
        );

        let err = ProtocolError::invalid("ipv4", "total_length", "70000 exceeds 65535");
        assert_eq!(
            err.to_string(),
            "ipv4: invalid total_length: 70000 exceeds 65535"
        );
    }

    #[test]
    fn test_error_wraps_sources() {
        let err: Error = ProtocolError::too_short("tcp", 20, 3).into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = CodecError::UnknownCompression(9).into();
        assert_eq!(err.to_string(), "Codec error: unknown compression type 9");
    }
}
