//! One-shot STUN exchanges over UDP and TCP.
//!
//! Each exchange is exactly one request and one bounded wait for one
//! response: no retransmission, no backoff, a fresh socket and a fresh
//! transaction ID every time. Transport failures of any kind surface as
//! [`ProbeError::NoResponse`]; a response that arrives but does not decode
//! is reported separately.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::attr::{ChangeRequest, MappedAddress, StunAttribute};
use crate::error::ProbeError;
use crate::message::{MessageType, StunMessage};

/// Receive buffer for one UDP datagram
const RECV_BUFFER_SIZE: usize = 2048;

/// Default per-probe timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// A STUN server to probe
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    /// Hostname or IP address
    pub host: String,
    /// Port (3478 for classic STUN, 19302 for Google's servers)
    pub port: u16,
    /// Per-probe timeout
    pub timeout: Duration,
    /// RFC 5389 strictness flag; see [`StunMessage::decode`]
    pub strict: bool,
}

impl ServerEndpoint {
    /// Endpoint with the default timeout, strict parsing
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            strict: true,
        }
    }

    /// `host:port` for logs and error messages
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which transport a probe runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Single datagram exchange
    Udp,
    /// Length-prefixed exchange over a fresh connection
    Tcp,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp => write!(f, "udp"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// STUN client bound to one server endpoint
pub struct StunClient {
    endpoint: ServerEndpoint,
}

impl StunClient {
    /// Client for the given endpoint
    #[must_use]
    pub fn new(endpoint: ServerEndpoint) -> Self {
        debug!(
            server = %endpoint.authority(),
            strict = endpoint.strict,
            "stun client initialized"
        );
        Self { endpoint }
    }

    /// The endpoint this client probes
    #[must_use]
    pub fn endpoint(&self) -> &ServerEndpoint {
        &self.endpoint
    }

    /// Send one datagram, await one datagram, decode it.
    pub async fn exchange_udp(&self, request: &StunMessage) -> Result<StunMessage, ProbeError> {
        let txid = request.transaction_id();
        debug!(server = %self.endpoint.authority(), txid = %txid, "udp exchange");

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "failed to bind udp socket");
                return Err(ProbeError::NoResponse);
            }
        };

        let bytes = request.encode();
        let target = (self.endpoint.host.as_str(), self.endpoint.port);
        match timeout(self.endpoint.timeout, socket.send_to(&bytes, target)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(server = %self.endpoint.authority(), error = %e, "udp send failed");
                return Err(ProbeError::NoResponse);
            }
            Err(_) => {
                warn!(server = %self.endpoint.authority(), "udp send timed out");
                return Err(ProbeError::NoResponse);
            }
        }

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, from) = match timeout(self.endpoint.timeout, socket.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!(server = %self.endpoint.authority(), error = %e, txid = %txid, "udp receive failed");
                return Err(ProbeError::NoResponse);
            }
            Err(_) => {
                warn!(server = %self.endpoint.authority(), txid = %txid, "no udp response within timeout");
                return Err(ProbeError::NoResponse);
            }
        };
        debug!(from = %from, len, txid = %txid, "udp response received");

        Ok(StunMessage::decode(
            &buf[..len],
            Some(txid),
            self.endpoint.strict,
        )?)
    }

    /// Connect, write the request behind a 2-byte length prefix, read one
    /// length-prefixed response, decode it.
    pub async fn exchange_tcp(&self, request: &StunMessage) -> Result<StunMessage, ProbeError> {
        let txid = request.transaction_id();
        debug!(server = %self.endpoint.authority(), txid = %txid, "tcp exchange");

        let target = (self.endpoint.host.as_str(), self.endpoint.port);
        let mut stream = match timeout(self.endpoint.timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(server = %self.endpoint.authority(), error = %e, "tcp connect failed");
                return Err(ProbeError::NoResponse);
            }
            Err(_) => {
                warn!(server = %self.endpoint.authority(), "tcp connect timed out");
                return Err(ProbeError::NoResponse);
            }
        };

        let payload = request.encode();
        let mut framed = Vec::with_capacity(2 + payload.len());
        framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        framed.extend_from_slice(&payload);

        match timeout(self.endpoint.timeout, stream.write_all(&framed)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(server = %self.endpoint.authority(), error = %e, "tcp write failed");
                return Err(ProbeError::NoResponse);
            }
            Err(_) => {
                warn!(server = %self.endpoint.authority(), "tcp write timed out");
                return Err(ProbeError::NoResponse);
            }
        }

        let mut prefix = [0u8; 2];
        match timeout(self.endpoint.timeout, stream.read_exact(&mut prefix)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(server = %self.endpoint.authority(), error = %e, txid = %txid, "failed to read tcp length prefix");
                return Err(ProbeError::NoResponse);
            }
            Err(_) => {
                warn!(server = %self.endpoint.authority(), txid = %txid, "no tcp response within timeout");
                return Err(ProbeError::NoResponse);
            }
        }
        let response_len = u16::from_be_bytes(prefix) as usize;
        debug!(response_len, txid = %txid, "tcp length prefix read");

        let mut payload = vec![0u8; response_len];
        // read_exact loops until filled; premature close is a failure
        match timeout(self.endpoint.timeout, stream.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(
                    server = %self.endpoint.authority(),
                    error = %e,
                    expected = response_len,
                    txid = %txid,
                    "tcp response truncated"
                );
                return Err(ProbeError::NoResponse);
            }
            Err(_) => {
                warn!(server = %self.endpoint.authority(), txid = %txid, "tcp read timed out");
                return Err(ProbeError::NoResponse);
            }
        }

        Ok(StunMessage::decode(
            &payload,
            Some(txid),
            self.endpoint.strict,
        )?)
    }

    /// Plain Binding Request; returns the server-reflexive address.
    ///
    /// A well-formed response carrying an ERROR-CODE attribute is a failed
    /// probe even though the wire exchange succeeded.
    pub async fn discover_mapped_address(
        &self,
        transport: Transport,
    ) -> Result<MappedAddress, ProbeError> {
        info!(server = %self.endpoint.authority(), %transport, "discovering mapped address");
        let request = StunMessage::binding_request();
        let response = match transport {
            Transport::Udp => self.exchange_udp(&request).await?,
            Transport::Tcp => self.exchange_tcp(&request).await?,
        };

        if let Some(err) = response.error_code() {
            return Err(ProbeError::Server {
                code: err.code,
                reason: err.sanitized_reason(),
            });
        }
        if response.message_type() != MessageType::BindingSuccess {
            warn!(
                server = %self.endpoint.authority(),
                kind = %response.message_type(),
                "expected a binding success response"
            );
            return Err(ProbeError::UnexpectedResponse);
        }

        let mapped = response.mapped_address().ok_or(ProbeError::MissingAddress)?;
        info!(server = %self.endpoint.authority(), %transport, mapped = %mapped, "mapped address discovered");
        Ok(mapped)
    }

    /// Binding Request with a CHANGE-REQUEST attribute over UDP.
    ///
    /// Returns whether any parseable response arrived at all; the content
    /// does not matter for classification.
    pub async fn probe_change_request(&self, change: ChangeRequest) -> bool {
        info!(
            server = %self.endpoint.authority(),
            change_ip = change.change_ip,
            change_port = change.change_port,
            "change-request probe"
        );
        let mut request = StunMessage::binding_request();
        request.add_attribute(StunAttribute::ChangeRequest(change));
        let responded = self.exchange_udp(&request).await.is_ok();
        info!(server = %self.endpoint.authority(), responded, "change-request probe finished");
        responded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AddressSource;
    use crate::error::CodecError;
    use crate::message::{HEADER_SIZE, TransactionId};
    use std::net::SocketAddr;

    fn short_endpoint(addr: SocketAddr) -> ServerEndpoint {
        ServerEndpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
            timeout: Duration::from_millis(250),
            strict: true,
        }
    }

    /// Success response mirroring the request's transaction ID
    fn success_response(request: &StunMessage, ip: &str, port: u16) -> Vec<u8> {
        let mut response =
            StunMessage::new(MessageType::BindingSuccess, request.transaction_id());
        response.add_attribute(StunAttribute::XorMapped {
            ip: ip.parse().unwrap(),
            port,
        });
        response.encode()
    }

    /// One-shot UDP responder; answers the first datagram with `reply(request)`.
    async fn spawn_udp_responder<F>(reply: F) -> SocketAddr
    where
        F: FnOnce(StunMessage) -> Option<Vec<u8>> + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; RECV_BUFFER_SIZE];
            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            let request = StunMessage::decode(&buf[..len], None, true).unwrap();
            if let Some(bytes) = reply(request) {
                socket.send_to(&bytes, from).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_udp_exchange_discovers_mapped_address() {
        let addr = spawn_udp_responder(|req| Some(success_response(&req, "203.0.113.4", 40000)))
            .await;
        let client = StunClient::new(short_endpoint(addr));
        let mapped = client
            .discover_mapped_address(Transport::Udp)
            .await
            .unwrap();
        assert_eq!(mapped.ip.to_string(), "203.0.113.4");
        assert_eq!(mapped.port, 40000);
        assert_eq!(mapped.source, AddressSource::XorMapped);
    }

    #[tokio::test]
    async fn test_udp_timeout_is_no_response() {
        let addr = spawn_udp_responder(|_| None).await;
        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Udp)
            .await
            .unwrap_err();
        assert!(err.is_silence());
    }

    #[tokio::test]
    async fn test_udp_garbage_is_a_decode_failure_not_silence() {
        let addr = spawn_udp_responder(|_| Some(vec![0xff; HEADER_SIZE])).await;
        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Udp)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Codec(CodecError::CookieMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_udp_stale_transaction_id_rejected() {
        let addr = spawn_udp_responder(|_| {
            // Well-formed response under a different transaction ID
            let stale = StunMessage::new(
                MessageType::BindingSuccess,
                TransactionId::from([0x55; 12]),
            );
            Some(stale.encode())
        })
        .await;
        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Udp)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Codec(CodecError::TransactionIdMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_error_code_response_is_a_server_error() {
        let addr = spawn_udp_responder(|req| {
            let mut response =
                StunMessage::new(MessageType::BindingError, req.transaction_id());
            response.add_attribute(StunAttribute::ErrorCode(crate::attr::ErrorCode {
                code: 400,
                reason: "Bad Request".to_string(),
            }));
            Some(response.encode())
        })
        .await;
        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Udp)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Server { code: 400, .. }));
    }

    #[tokio::test]
    async fn test_success_without_address_is_missing_address() {
        let addr = spawn_udp_responder(|req| {
            Some(StunMessage::new(MessageType::BindingSuccess, req.transaction_id()).encode())
        })
        .await;
        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Udp)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::MissingAddress));
    }

    #[tokio::test]
    async fn test_change_request_probe_reports_any_response() {
        let addr = spawn_udp_responder(|req| {
            // Server must have seen the CHANGE-REQUEST attribute
            assert!(req
                .attributes()
                .iter()
                .any(|a| matches!(a, StunAttribute::ChangeRequest(c) if c.bits() == 0x6)));
            Some(success_response(&req, "203.0.113.4", 40000))
        })
        .await;
        let client = StunClient::new(short_endpoint(addr));
        assert!(client.probe_change_request(ChangeRequest::ip_and_port()).await);
    }

    #[tokio::test]
    async fn test_change_request_probe_silence() {
        let addr = spawn_udp_responder(|_| None).await;
        let client = StunClient::new(short_endpoint(addr));
        assert!(!client.probe_change_request(ChangeRequest::port_only()).await);
    }

    #[tokio::test]
    async fn test_tcp_exchange_with_length_prefix_framing() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 2];
            stream.read_exact(&mut prefix).await.unwrap();
            let len = u16::from_be_bytes(prefix) as usize;
            let mut payload = vec![0u8; len];
            stream.read_exact(&mut payload).await.unwrap();
            let request = StunMessage::decode(&payload, None, true).unwrap();

            let response = success_response(&request, "198.51.100.23", 61234);
            let mut framed = (response.len() as u16).to_be_bytes().to_vec();
            framed.extend_from_slice(&response);
            stream.write_all(&framed).await.unwrap();
        });

        let client = StunClient::new(short_endpoint(addr));
        let mapped = client
            .discover_mapped_address(Transport::Tcp)
            .await
            .unwrap();
        assert_eq!(mapped.ip.to_string(), "198.51.100.23");
        assert_eq!(mapped.port, 61234);
    }

    #[tokio::test]
    async fn test_tcp_premature_close_is_no_response() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 2];
            stream.read_exact(&mut prefix).await.unwrap();
            // Claim 40 payload bytes, deliver 4, hang up
            stream.write_all(&40u16.to_be_bytes()).await.unwrap();
            stream.write_all(&[0u8; 4]).await.unwrap();
        });

        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Tcp)
            .await
            .unwrap_err();
        assert!(err.is_silence());
    }

    #[tokio::test]
    async fn test_tcp_connect_refused_is_no_response() {
        // Bind then drop to get a port with no listener
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = StunClient::new(short_endpoint(addr));
        let err = client
            .discover_mapped_address(Transport::Tcp)
            .await
            .unwrap_err();
        assert!(err.is_silence());
    }
}
