//! STUN attribute encoding and decoding.
//!
//! Attributes are a closed set of tagged variants. Anything the codec does
//! not interpret (unknown type codes, non-IPv4 address families, non-UTF-8
//! text) is carried verbatim as [`StunAttribute::Raw`] so that re-encoding
//! reproduces the original wire bytes.

use std::fmt;
use std::net::Ipv4Addr;

use crate::message::MAGIC_COOKIE;

/// MAPPED-ADDRESS attribute type code
pub const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
/// CHANGE-REQUEST attribute type code (classic STUN)
pub const ATTR_CHANGE_REQUEST: u16 = 0x0003;
/// SOURCE-ADDRESS attribute type code (classic STUN)
pub const ATTR_SOURCE_ADDRESS: u16 = 0x0004;
/// CHANGED-ADDRESS attribute type code (classic STUN)
pub const ATTR_CHANGED_ADDRESS: u16 = 0x0005;
/// ERROR-CODE attribute type code
pub const ATTR_ERROR_CODE: u16 = 0x0009;
/// XOR-MAPPED-ADDRESS attribute type code
pub const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
/// SOFTWARE attribute type code
pub const ATTR_SOFTWARE: u16 = 0x8022;
/// RESPONSE-ORIGIN attribute type code
pub const ATTR_RESPONSE_ORIGIN: u16 = 0x802b;
/// OTHER-ADDRESS attribute type code
pub const ATTR_OTHER_ADDRESS: u16 = 0x802c;

/// IPv4 address family byte in address attributes
const FAMILY_IPV4: u8 = 0x01;

/// Human-readable name for a STUN attribute type code, for diagnostics.
#[must_use]
pub fn attr_name(code: u16) -> &'static str {
    match code {
        ATTR_MAPPED_ADDRESS => "MAPPED-ADDRESS",
        ATTR_CHANGE_REQUEST => "CHANGE-REQUEST",
        ATTR_SOURCE_ADDRESS => "SOURCE-ADDRESS",
        ATTR_CHANGED_ADDRESS => "CHANGED-ADDRESS",
        ATTR_ERROR_CODE => "ERROR-CODE",
        ATTR_XOR_MAPPED_ADDRESS => "XOR-MAPPED-ADDRESS",
        ATTR_SOFTWARE => "SOFTWARE",
        ATTR_RESPONSE_ORIGIN => "RESPONSE-ORIGIN",
        ATTR_OTHER_ADDRESS => "OTHER-ADDRESS",
        _ => "UNKNOWN",
    }
}

/// Which attribute a mapped address was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    /// Plain MAPPED-ADDRESS (0x0001)
    Mapped,
    /// XOR-MAPPED-ADDRESS (0x0020)
    XorMapped,
    /// CHANGED-ADDRESS (0x0005)
    Changed,
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapped => write!(f, "MAPPED-ADDRESS"),
            Self::XorMapped => write!(f, "XOR-MAPPED-ADDRESS"),
            Self::Changed => write!(f, "CHANGED-ADDRESS"),
        }
    }
}

/// An IPv4 address reflected back by a STUN server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedAddress {
    /// Externally visible IPv4 address
    pub ip: Ipv4Addr,
    /// Externally visible port
    pub port: u16,
    /// Attribute the address was taken from
    pub source: AddressSource,
}

impl MappedAddress {
    /// True when two mappings name the same external (ip, port) pair,
    /// regardless of which attribute each was extracted from.
    #[must_use]
    pub fn same_endpoint(&self, other: &MappedAddress) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// ERROR-CODE attribute payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCode {
    /// class * 100 + number
    pub code: u16,
    /// Reason phrase as received (may need sanitizing before display)
    pub reason: String,
}

impl ErrorCode {
    /// Reason phrase with surrounding whitespace and control characters
    /// stripped, safe to show to a user.
    #[must_use]
    pub fn sanitized_reason(&self) -> String {
        self.reason
            .trim()
            .chars()
            .filter(|c| !c.is_control())
            .collect()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.sanitized_reason())
    }
}

/// CHANGE-REQUEST flags asking the server to reply from a different
/// IP and/or port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRequest {
    /// "Change IP" flag (bit 2)
    pub change_ip: bool,
    /// "Change port" flag (bit 1)
    pub change_port: bool,
}

impl ChangeRequest {
    /// Change both IP and port (`0x00000006`), used by classification Test II.
    #[must_use]
    pub fn ip_and_port() -> Self {
        Self {
            change_ip: true,
            change_port: true,
        }
    }

    /// Change port only (`0x00000002`), used by classification Test III.
    #[must_use]
    pub fn port_only() -> Self {
        Self {
            change_ip: false,
            change_port: true,
        }
    }

    /// 32-bit wire encoding of the flags
    #[must_use]
    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.change_ip {
            bits |= 0x0000_0004;
        }
        if self.change_port {
            bits |= 0x0000_0002;
        }
        bits
    }

    fn from_bits(bits: u32) -> Self {
        Self {
            change_ip: bits & 0x0000_0004 != 0,
            change_port: bits & 0x0000_0002 != 0,
        }
    }
}

/// A single STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StunAttribute {
    /// MAPPED-ADDRESS (0x0001), IPv4
    Mapped {
        /// Address as sent, no masking
        ip: Ipv4Addr,
        /// Port as sent
        port: u16,
    },
    /// XOR-MAPPED-ADDRESS (0x0020), IPv4, masked with the magic cookie
    XorMapped {
        /// Un-XORed address
        ip: Ipv4Addr,
        /// Un-XORed port
        port: u16,
    },
    /// CHANGED-ADDRESS (0x0005), IPv4
    Changed {
        /// Alternate server address
        ip: Ipv4Addr,
        /// Alternate server port
        port: u16,
    },
    /// CHANGE-REQUEST (0x0003)
    ChangeRequest(ChangeRequest),
    /// ERROR-CODE (0x0009)
    ErrorCode(ErrorCode),
    /// SOFTWARE (0x8022)
    Software(String),
    /// Any attribute the codec does not interpret, kept as raw bytes
    Raw(u16, Vec<u8>),
}

impl StunAttribute {
    /// Wire type code for this attribute
    #[must_use]
    pub fn attr_type(&self) -> u16 {
        match self {
            Self::Mapped { .. } => ATTR_MAPPED_ADDRESS,
            Self::XorMapped { .. } => ATTR_XOR_MAPPED_ADDRESS,
            Self::Changed { .. } => ATTR_CHANGED_ADDRESS,
            Self::ChangeRequest(_) => ATTR_CHANGE_REQUEST,
            Self::ErrorCode(_) => ATTR_ERROR_CODE,
            Self::Software(_) => ATTR_SOFTWARE,
            Self::Raw(t, _) => *t,
        }
    }

    /// Encode the attribute value (without the type/length header
    /// and without padding).
    #[must_use]
    pub fn encode_value(&self) -> Vec<u8> {
        match self {
            Self::Mapped { ip, port } | Self::Changed { ip, port } => {
                let mut value = Vec::with_capacity(8);
                value.push(0);
                value.push(FAMILY_IPV4);
                value.extend_from_slice(&port.to_be_bytes());
                value.extend_from_slice(&ip.octets());
                value
            }
            Self::XorMapped { ip, port } => {
                let mut value = Vec::with_capacity(8);
                value.push(0);
                value.push(FAMILY_IPV4);
                let xor_port = port ^ (MAGIC_COOKIE >> 16) as u16;
                value.extend_from_slice(&xor_port.to_be_bytes());
                let xor_ip = u32::from(*ip) ^ MAGIC_COOKIE;
                value.extend_from_slice(&xor_ip.to_be_bytes());
                value
            }
            Self::ChangeRequest(req) => req.bits().to_be_bytes().to_vec(),
            Self::ErrorCode(err) => {
                let mut value = Vec::with_capacity(4 + err.reason.len());
                value.push(0);
                value.push(0);
                value.push((err.code / 100) as u8 & 0x07);
                value.push((err.code % 100) as u8);
                value.extend_from_slice(err.reason.as_bytes());
                value
            }
            Self::Software(s) => s.as_bytes().to_vec(),
            Self::Raw(_, value) => value.clone(),
        }
    }

    /// Full wire encoding: type, logical length, value, zero padding
    /// to the next 4-byte boundary.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let value = self.encode_value();
        let mut bytes = Vec::with_capacity(4 + value.len() + 3);
        bytes.extend_from_slice(&self.attr_type().to_be_bytes());
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&value);
        let padding = (4 - (value.len() % 4)) % 4;
        bytes.extend(std::iter::repeat_n(0, padding));
        bytes
    }

    /// Interpret a (type, value) pair pulled off the wire.
    ///
    /// Decoding is total: values the codec cannot interpret (wrong length,
    /// non-IPv4 family, invalid UTF-8) fall back to [`Self::Raw`] so the
    /// attribute survives a re-encode byte for byte.
    #[must_use]
    pub fn decode(attr_type: u16, value: &[u8]) -> Self {
        let raw = || Self::Raw(attr_type, value.to_vec());
        match attr_type {
            ATTR_MAPPED_ADDRESS | ATTR_CHANGED_ADDRESS => {
                match decode_plain_address(value) {
                    Some((ip, port)) if attr_type == ATTR_MAPPED_ADDRESS => {
                        Self::Mapped { ip, port }
                    }
                    Some((ip, port)) => Self::Changed { ip, port },
                    None => raw(),
                }
            }
            ATTR_XOR_MAPPED_ADDRESS => match decode_plain_address(value) {
                Some((masked_ip, masked_port)) => {
                    let port = masked_port ^ (MAGIC_COOKIE >> 16) as u16;
                    let ip = Ipv4Addr::from(u32::from(masked_ip) ^ MAGIC_COOKIE);
                    Self::XorMapped { ip, port }
                }
                None => raw(),
            },
            ATTR_CHANGE_REQUEST => {
                if value.len() == 4 {
                    let bits = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
                    Self::ChangeRequest(ChangeRequest::from_bits(bits))
                } else {
                    raw()
                }
            }
            ATTR_ERROR_CODE => {
                if value.len() < 4 {
                    return raw();
                }
                let class = u16::from(value[2] & 0x07);
                let number = u16::from(value[3]);
                match std::str::from_utf8(&value[4..]) {
                    Ok(reason) => Self::ErrorCode(ErrorCode {
                        code: class * 100 + number,
                        reason: reason.to_string(),
                    }),
                    Err(_) => raw(),
                }
            }
            ATTR_SOFTWARE => match std::str::from_utf8(value) {
                Ok(s) => Self::Software(s.to_string()),
                Err(_) => raw(),
            },
            _ => raw(),
        }
    }
}

/// Parse the common address attribute layout: reserved byte, family byte,
/// 16-bit port, 32-bit IPv4 address. Non-IPv4 families yield no address.
fn decode_plain_address(value: &[u8]) -> Option<(Ipv4Addr, u16)> {
    if value.len() < 8 || value[1] != FAMILY_IPV4 {
        return None;
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
    Some((ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_request_bits() {
        assert_eq!(ChangeRequest::ip_and_port().bits(), 0x0000_0006);
        assert_eq!(ChangeRequest::port_only().bits(), 0x0000_0002);
    }

    #[test]
    fn test_change_request_wire_value() {
        let attr = StunAttribute::ChangeRequest(ChangeRequest::ip_and_port());
        assert_eq!(attr.encode_value(), vec![0, 0, 0, 6]);
        // Already 4-byte aligned, no padding
        assert_eq!(attr.encode().len(), 8);
    }

    #[test]
    fn test_xor_mapped_address_masking() {
        let attr = StunAttribute::XorMapped {
            ip: "192.0.2.1".parse().unwrap(),
            port: 64000,
        };
        let value = attr.encode_value();
        assert_eq!(value.len(), 8);
        assert_eq!(value[1], 0x01);
        // Port masked with the high 16 bits of the cookie
        let masked_port = u16::from_be_bytes([value[2], value[3]]);
        assert_eq!(masked_port, 64000 ^ 0x2112);

        let decoded = StunAttribute::decode(ATTR_XOR_MAPPED_ADDRESS, &value);
        assert_eq!(decoded, attr);
    }

    #[test]
    fn test_mapped_address_not_masked() {
        let attr = StunAttribute::Mapped {
            ip: "203.0.113.9".parse().unwrap(),
            port: 3478,
        };
        let value = attr.encode_value();
        assert_eq!(&value[4..8], &[203, 0, 113, 9]);
        assert_eq!(u16::from_be_bytes([value[2], value[3]]), 3478);
    }

    #[test]
    fn test_non_ipv4_family_stays_raw() {
        // Family byte 0x02 (IPv6); must not be interpreted as an address
        let value = vec![0, 0x02, 0x12, 0x34, 1, 2, 3, 4];
        let decoded = StunAttribute::decode(ATTR_MAPPED_ADDRESS, &value);
        assert_eq!(decoded, StunAttribute::Raw(ATTR_MAPPED_ADDRESS, value));
    }

    #[test]
    fn test_error_code_decode() {
        let mut value = vec![0, 0, 4, 1];
        value.extend_from_slice(b"Unauthorized");
        let decoded = StunAttribute::decode(ATTR_ERROR_CODE, &value);
        let StunAttribute::ErrorCode(err) = decoded else {
            panic!("expected ErrorCode");
        };
        assert_eq!(err.code, 401);
        assert_eq!(err.reason, "Unauthorized");
    }

    #[test]
    fn test_error_code_class_low_bits_only() {
        // Class byte with junk in the high bits: only the low 3 count
        let value = vec![0, 0, 0xFC, 38, b'x'];
        let decoded = StunAttribute::decode(ATTR_ERROR_CODE, &value);
        let StunAttribute::ErrorCode(err) = decoded else {
            panic!("expected ErrorCode");
        };
        assert_eq!(err.code, 4 * 100 + 38);
    }

    #[test]
    fn test_error_code_too_short_stays_raw() {
        let value = vec![0, 0, 4];
        let decoded = StunAttribute::decode(ATTR_ERROR_CODE, &value);
        assert!(matches!(decoded, StunAttribute::Raw(ATTR_ERROR_CODE, _)));
    }

    #[test]
    fn test_sanitized_reason_strips_controls() {
        let err = ErrorCode {
            code: 500,
            reason: "  Server\n Error\t ".to_string(),
        };
        assert_eq!(err.sanitized_reason(), "Server Error");
    }

    #[test]
    fn test_unknown_attribute_round_trip() {
        let attr = StunAttribute::Raw(0x7777, vec![9, 9, 9]);
        let encoded = attr.encode();
        // 4-byte header + 3 value bytes + 1 padding byte
        assert_eq!(encoded.len(), 8);
        assert_eq!(u16::from_be_bytes([encoded[2], encoded[3]]), 3);
        let decoded = StunAttribute::decode(0x7777, &encoded[4..7]);
        assert_eq!(decoded, attr);
    }

    #[test]
    fn test_attr_name() {
        assert_eq!(attr_name(ATTR_XOR_MAPPED_ADDRESS), "XOR-MAPPED-ADDRESS");
        assert_eq!(attr_name(0x7777), "UNKNOWN");
    }
}
