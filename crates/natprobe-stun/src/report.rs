//! Single-test invocation contract.
//!
//! An external caller (a CLI here, a request router in other deployments)
//! asks for one test at a time by identifier and gets back a structured
//! outcome it can serialize as-is. Tests II and III report success even
//! when the server stayed silent: the probe ran, and silence is a valid
//! result the caller folds into the classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::attr::{ChangeRequest, MappedAddress};
use crate::client::{ServerEndpoint, StunClient, Transport};

/// Identifier of one probe in the classification procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestId {
    /// Binding Request to the primary server over UDP
    Test1,
    /// CHANGE-REQUEST (IP and port) to the primary server
    Test2,
    /// CHANGE-REQUEST (port only) to the primary server
    Test3,
    /// Binding Request to the secondary server over UDP
    Test4,
    /// Binding Request to the primary server over TCP
    TestTcp1,
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test1 => write!(f, "test1"),
            Self::Test2 => write!(f, "test2"),
            Self::Test3 => write!(f, "test3"),
            Self::Test4 => write!(f, "test4"),
            Self::TestTcp1 => write!(f, "test_tcp1"),
        }
    }
}

impl FromStr for TestId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test1" => Ok(Self::Test1),
            "test2" => Ok(Self::Test2),
            "test3" => Ok(Self::Test3),
            "test4" => Ok(Self::Test4),
            "test_tcp1" => Ok(Self::TestTcp1),
            other => Err(format!(
                "unknown test id '{other}' (expected test1, test2, test3, test4, or test_tcp1)"
            )),
        }
    }
}

/// Payload of a successful probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TestData {
    /// Server-reflexive address from a binding test
    Address {
        /// Dotted-quad IPv4 address
        ip: String,
        /// External port
        port: u16,
        /// Attribute the address came from
        #[serde(rename = "type")]
        source: String,
    },
    /// Outcome of a change-request test
    ChangeRequest {
        /// Whether any response arrived
        response_received: bool,
    },
}

impl From<MappedAddress> for TestData {
    fn from(mapped: MappedAddress) -> Self {
        Self::Address {
            ip: mapped.ip.to_string(),
            port: mapped.port,
            source: mapped.source.to_string(),
        }
    }
}

/// Structured outcome of one probe
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// Whether the probe itself completed
    pub success: bool,
    /// Which test ran
    pub test_id: TestId,
    /// Probe payload on success
    pub data: Option<TestData>,
    /// Failure description otherwise
    pub error: Option<String>,
}

impl TestReport {
    fn success(test_id: TestId, data: TestData) -> Self {
        Self {
            success: true,
            test_id,
            data: Some(data),
            error: None,
        }
    }

    fn failure(test_id: TestId, error: String) -> Self {
        Self {
            success: false,
            test_id,
            data: None,
            error: Some(error),
        }
    }
}

/// Run one test by identifier.
///
/// Tests I-III and the TCP variant of Test I go to `primary`; Test IV goes
/// to `secondary`.
pub async fn run_test(
    test_id: TestId,
    primary: &ServerEndpoint,
    secondary: &ServerEndpoint,
) -> TestReport {
    info!(%test_id, "running single test");
    match test_id {
        TestId::Test1 | TestId::TestTcp1 => {
            let transport = if test_id == TestId::TestTcp1 {
                Transport::Tcp
            } else {
                Transport::Udp
            };
            let client = StunClient::new(primary.clone());
            match client.discover_mapped_address(transport).await {
                Ok(mapped) => TestReport::success(test_id, mapped.into()),
                Err(e) => {
                    warn!(%test_id, error = %e, "test failed");
                    TestReport::failure(
                        test_id,
                        format!(
                            "Test I ({transport}): failed to get mapped address from {}: {e}",
                            primary.authority()
                        ),
                    )
                }
            }
        }
        TestId::Test2 => {
            let client = StunClient::new(primary.clone());
            let responded = client.probe_change_request(ChangeRequest::ip_and_port()).await;
            TestReport::success(
                test_id,
                TestData::ChangeRequest {
                    response_received: responded,
                },
            )
        }
        TestId::Test3 => {
            let client = StunClient::new(primary.clone());
            let responded = client.probe_change_request(ChangeRequest::port_only()).await;
            TestReport::success(
                test_id,
                TestData::ChangeRequest {
                    response_received: responded,
                },
            )
        }
        TestId::Test4 => {
            let client = StunClient::new(secondary.clone());
            match client.discover_mapped_address(Transport::Udp).await {
                Ok(mapped) => TestReport::success(test_id, mapped.into()),
                Err(e) => {
                    warn!(%test_id, error = %e, "test failed");
                    TestReport::failure(
                        test_id,
                        format!(
                            "Test IV (udp): failed to get mapped address from {}: {e}",
                            secondary.authority()
                        ),
                    )
                }
            }
        }
    }
}
