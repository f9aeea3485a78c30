//! Error types for the codec and the probe pipeline.

use thiserror::Error;

use crate::message::TransactionId;

/// Hard decode failures. A failed decode never yields a partially
/// populated message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Fewer than the 20 header bytes
    #[error("message too short: {0} bytes, header needs 20")]
    MessageTooShort(usize),

    /// Magic cookie is not the RFC 5389 constant
    #[error("magic cookie mismatch: got {0:#010x}, want 0x2112a442")]
    CookieMismatch(u32),

    /// Response transaction ID differs from the request's
    #[error("transaction id mismatch: expected {expected}, got {got}")]
    TransactionIdMismatch {
        /// Transaction ID of the request
        expected: TransactionId,
        /// Transaction ID carried by the response
        got: TransactionId,
    },

    /// Buffer holds fewer attribute bytes than the header declares
    #[error("declared length {declared} exceeds {available} available bytes")]
    TruncatedBody {
        /// Length field from the header
        declared: usize,
        /// Bytes actually present after the header
        available: usize,
    },

    /// An attribute's declared length overruns the attribute region
    #[error(
        "attribute {attr_type:#06x} declares {declared} value bytes, only {available} remain"
    )]
    AttributeOverrun {
        /// Attribute type code
        attr_type: u16,
        /// Declared value length
        declared: usize,
        /// Bytes remaining in the region
        available: usize,
    },

    /// Message type outside the Binding request/response set
    #[error("unsupported message type {0:#06x}")]
    UnsupportedMessageType(u16),

    /// Transaction ID built from a slice that is not 12 bytes
    #[error("transaction id must be 12 bytes, got {0}")]
    InvalidTransactionId(usize),
}

/// Failures of a single probe (one request/response cycle).
///
/// Transport-level trouble collapses into [`ProbeError::NoResponse`]:
/// for classification purposes an unreachable server, a timeout, and a
/// dropped datagram all mean the same thing. Malformed and error-bearing
/// responses stay distinct.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Socket failure, send/receive failure, or timeout
    #[error("no response from server")]
    NoResponse,

    /// Bytes arrived but did not decode into a valid message
    #[error("malformed response: {0}")]
    Codec(#[from] CodecError),

    /// Well-formed response carrying an ERROR-CODE attribute
    #[error("server error {code}: {reason}")]
    Server {
        /// class * 100 + number
        code: u16,
        /// Sanitized reason phrase
        reason: String,
    },

    /// Success response without a usable mapped address
    #[error("response carries no usable mapped address")]
    MissingAddress,

    /// Response type is not a Binding Success Response
    #[error("unexpected response type")]
    UnexpectedResponse,
}

impl ProbeError {
    /// Whether this failure means the server stayed silent (as opposed
    /// to answering with something unusable).
    #[must_use]
    pub fn is_silence(&self) -> bool {
        matches!(self, Self::NoResponse)
    }
}
