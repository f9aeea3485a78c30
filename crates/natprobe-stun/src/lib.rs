//! # natprobe-stun
//!
//! STUN-based NAT topology classification.
//!
//! This crate provides:
//! - A binary STUN message codec (RFC 5389 framing, XOR-MAPPED-ADDRESS
//!   un-masking, attribute type/length/value records)
//! - A one-shot exchange layer over UDP or TCP with bounded timeouts
//! - The classic four-test NAT classification procedure against one
//!   primary and one secondary server
//!
//! RFC 3489 legacy framing (16-byte transaction IDs) is not supported:
//! responses without the RFC 5389 magic cookie are rejected regardless of
//! an endpoint's strictness flag.
//!
//! ## Example
//!
//! ```rust,no_run
//! use natprobe_stun::{NatDetector, ServerEndpoint};
//!
//! # async fn example() {
//! let primary = ServerEndpoint::new("stun.l.google.com", 19302);
//! let secondary = ServerEndpoint::new("stun.xten.com", 3478);
//! let classification = NatDetector::new(primary, secondary).detect().await;
//! println!("NAT type: {classification}");
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attr;
pub mod client;
pub mod detect;
pub mod error;
pub mod message;
pub mod report;

// Re-export commonly used types
pub use attr::{AddressSource, ChangeRequest, ErrorCode, MappedAddress, StunAttribute};
pub use client::{ServerEndpoint, StunClient, Transport};
pub use detect::{NatClassification, NatDetector, ProbeLog};
pub use error::{CodecError, ProbeError};
pub use message::{MessageType, StunMessage, TransactionId};
pub use report::{TestData, TestId, TestReport, run_test};
