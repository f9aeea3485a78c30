//! STUN message framing (RFC 5389).
//!
//! A message is a 20-byte header followed by type/length/value attribute
//! records padded to 4-byte boundaries. The codec owns no I/O: it turns
//! messages into bytes and validated bytes back into messages, nothing else.

use std::fmt;

use rand::RngCore;
use tracing::{debug, info, warn};

use crate::attr::{
    ATTR_ERROR_CODE, AddressSource, ErrorCode, MappedAddress, StunAttribute, attr_name,
};
use crate::error::CodecError;

/// RFC 5389 magic cookie
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

/// STUN header size in bytes
pub const HEADER_SIZE: usize = 20;

/// STUN message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Binding Request (0x0001)
    BindingRequest,
    /// Binding Success Response (0x0101)
    BindingSuccess,
    /// Binding Error Response (0x0111)
    BindingError,
}

impl MessageType {
    /// 16-bit wire code
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::BindingRequest => 0x0001,
            Self::BindingSuccess => 0x0101,
            Self::BindingError => 0x0111,
        }
    }

    /// Parse a 16-bit wire code
    pub fn from_code(code: u16) -> Result<Self, CodecError> {
        match code {
            0x0001 => Ok(Self::BindingRequest),
            0x0101 => Ok(Self::BindingSuccess),
            0x0111 => Ok(Self::BindingError),
            other => Err(CodecError::UnsupportedMessageType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BindingRequest => write!(f, "Binding Request"),
            Self::BindingSuccess => write!(f, "Binding Success Response"),
            Self::BindingError => write!(f, "Binding Error Response"),
        }
    }
}

/// 96-bit STUN transaction ID
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    /// Fresh random transaction ID for a new probe
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build from a byte slice; anything other than 12 bytes fails.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let bytes: [u8; 12] = bytes
            .try_into()
            .map_err(|_| CodecError::InvalidTransactionId(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl From<[u8; 12]> for TransactionId {
    fn from(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({self})")
    }
}

/// A STUN message: type, transaction ID, and attributes in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    message_type: MessageType,
    transaction_id: TransactionId,
    attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// New message with the given type and transaction ID
    #[must_use]
    pub fn new(message_type: MessageType, transaction_id: TransactionId) -> Self {
        debug!(
            txid = %transaction_id,
            kind = %message_type,
            "stun message created"
        );
        Self {
            message_type,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Binding Request with a fresh random transaction ID and no attributes
    #[must_use]
    pub fn binding_request() -> Self {
        Self::new(MessageType::BindingRequest, TransactionId::random())
    }

    /// Message type
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Transaction ID
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Attributes in wire order
    #[must_use]
    pub fn attributes(&self) -> &[StunAttribute] {
        &self.attributes
    }

    /// Append an attribute; insertion order is wire order.
    pub fn add_attribute(&mut self, attr: StunAttribute) {
        debug!(
            txid = %self.transaction_id,
            attr = attr_name(attr.attr_type()),
            code = format_args!("{:#06x}", attr.attr_type()),
            "attribute added"
        );
        self.attributes.push(attr);
    }

    /// Encode to wire bytes: header, then padded attribute records.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut attr_region = Vec::new();
        for attr in &self.attributes {
            attr_region.extend_from_slice(&attr.encode());
        }

        let mut bytes = Vec::with_capacity(HEADER_SIZE + attr_region.len());
        bytes.extend_from_slice(&self.message_type.code().to_be_bytes());
        bytes.extend_from_slice(&(attr_region.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
        bytes.extend_from_slice(self.transaction_id.as_bytes());
        bytes.extend_from_slice(&attr_region);

        debug!(
            txid = %self.transaction_id,
            len = bytes.len(),
            "stun message encoded"
        );
        bytes
    }

    /// Decode wire bytes into a validated message.
    ///
    /// `expected_txid` is the transaction ID of the request this response
    /// answers; a mismatch is a hard failure. `strict` tracks the server's
    /// RFC 5389 strictness flag, but a missing magic cookie is rejected
    /// either way: this codec does not speak RFC 3489 framing, so the flag
    /// only changes how loudly the rejection is logged.
    pub fn decode(
        bytes: &[u8],
        expected_txid: Option<TransactionId>,
        strict: bool,
    ) -> Result<Self, CodecError> {
        debug!(len = bytes.len(), strict, "decoding stun message");
        if bytes.len() < HEADER_SIZE {
            warn!(len = bytes.len(), "stun message too short");
            return Err(CodecError::MessageTooShort(bytes.len()));
        }

        let type_code = u16::from_be_bytes([bytes[0], bytes[1]]);
        let declared_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let transaction_id = TransactionId::from_slice(&bytes[8..HEADER_SIZE])?;

        if cookie != MAGIC_COOKIE {
            if strict {
                warn!(
                    txid = %transaction_id,
                    got = format_args!("{cookie:#010x}"),
                    "magic cookie mismatch"
                );
            } else {
                info!(
                    txid = %transaction_id,
                    got = format_args!("{cookie:#010x}"),
                    "magic cookie mismatch; server may predate RFC 5389, which \
                     this codec does not support"
                );
            }
            return Err(CodecError::CookieMismatch(cookie));
        }

        if let Some(expected) = expected_txid {
            if transaction_id != expected {
                warn!(
                    expected = %expected,
                    got = %transaction_id,
                    "transaction id mismatch"
                );
                return Err(CodecError::TransactionIdMismatch {
                    expected,
                    got: transaction_id,
                });
            }
        }

        let body = &bytes[HEADER_SIZE..];
        if body.len() < declared_len {
            warn!(
                txid = %transaction_id,
                declared = declared_len,
                available = body.len(),
                "attribute region shorter than declared length"
            );
            return Err(CodecError::TruncatedBody {
                declared: declared_len,
                available: body.len(),
            });
        }

        let message_type = MessageType::from_code(type_code)?;
        let mut message = Self::new(message_type, transaction_id);

        let region = &body[..declared_len];
        let mut offset = 0;
        while offset < region.len() {
            if region.len() - offset < 4 {
                debug!(
                    txid = %transaction_id,
                    offset,
                    "attribute region exhausted before another header"
                );
                break;
            }
            let attr_type = u16::from_be_bytes([region[offset], region[offset + 1]]);
            let attr_len = u16::from_be_bytes([region[offset + 2], region[offset + 3]]) as usize;
            offset += 4;

            if region.len() - offset < attr_len {
                warn!(
                    txid = %transaction_id,
                    attr = attr_name(attr_type),
                    declared = attr_len,
                    available = region.len() - offset,
                    "attribute length overruns region"
                );
                return Err(CodecError::AttributeOverrun {
                    attr_type,
                    declared: attr_len,
                    available: region.len() - offset,
                });
            }
            let value = &region[offset..offset + attr_len];
            message
                .attributes
                .push(StunAttribute::decode(attr_type, value));
            offset += attr_len;
            // Skip padding to the next 4-byte boundary
            if attr_len % 4 != 0 {
                offset += 4 - (attr_len % 4);
            }
        }

        debug!(
            txid = %transaction_id,
            kind = %message_type,
            attrs = message.attributes.len(),
            "stun message decoded"
        );
        Ok(message)
    }

    /// The externally mapped address carried by this message, preferring
    /// XOR-MAPPED-ADDRESS over MAPPED-ADDRESS.
    #[must_use]
    pub fn mapped_address(&self) -> Option<MappedAddress> {
        for attr in &self.attributes {
            if let StunAttribute::XorMapped { ip, port } = attr {
                debug!(txid = %self.transaction_id, ip = %ip, port, "xor-mapped address found");
                return Some(MappedAddress {
                    ip: *ip,
                    port: *port,
                    source: AddressSource::XorMapped,
                });
            }
        }
        for attr in &self.attributes {
            if let StunAttribute::Mapped { ip, port } = attr {
                debug!(txid = %self.transaction_id, ip = %ip, port, "mapped address found");
                return Some(MappedAddress {
                    ip: *ip,
                    port: *port,
                    source: AddressSource::Mapped,
                });
            }
        }
        warn!(txid = %self.transaction_id, "no mapped address attribute present");
        None
    }

    /// The CHANGED-ADDRESS attribute, if present (classic STUN servers
    /// advertise their alternate endpoint here).
    #[must_use]
    pub fn changed_address(&self) -> Option<MappedAddress> {
        self.attributes.iter().find_map(|attr| {
            if let StunAttribute::Changed { ip, port } = attr {
                Some(MappedAddress {
                    ip: *ip,
                    port: *port,
                    source: AddressSource::Changed,
                })
            } else {
                None
            }
        })
    }

    /// The ERROR-CODE attribute, if present.
    #[must_use]
    pub fn error_code(&self) -> Option<&ErrorCode> {
        self.attributes.iter().find_map(|attr| {
            if let StunAttribute::ErrorCode(err) = attr {
                warn!(
                    txid = %self.transaction_id,
                    code = err.code,
                    reason = %err.sanitized_reason(),
                    attr = attr_name(ATTR_ERROR_CODE),
                    "server reported an error"
                );
                Some(err)
            } else {
                None
            }
        })
    }
}
