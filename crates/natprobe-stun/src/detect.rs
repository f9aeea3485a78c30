//! NAT classification decision procedure.
//!
//! The classic four-test sequence: Test I learns the mapped address from
//! the primary server, Tests II and III probe filtering behavior with
//! CHANGE-REQUEST attributes, and Test IV compares the mapping seen by a
//! second, independent server. The fold over recorded outcomes is pure;
//! [`NatDetector`] runs the probes and feeds it.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::attr::{ChangeRequest, MappedAddress};
use crate::client::{ServerEndpoint, StunClient, Transport};
use crate::report::TestId;

/// Final NAT mapping-behavior classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NatClassification {
    /// Public address or full-cone NAT: replies from a changed IP and
    /// port still arrive
    OpenOrFullCone,
    /// Replies arrive from a changed port on the contacted IP
    RestrictedCone,
    /// Same mapping toward both servers, but changed sources are filtered
    PortRestrictedCone,
    /// Different mapping per destination server
    Symmetric,
    /// Tests II and III were silent and Test IV failed, so the last two
    /// categories cannot be told apart
    PortRestrictedOrSymmetricUndetermined,
    /// Test I failed; nothing can be said about the topology
    Unknown,
}

impl fmt::Display for NatClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenOrFullCone => write!(f, "Open Internet or Full Cone NAT"),
            Self::RestrictedCone => write!(f, "Restricted Cone NAT"),
            Self::PortRestrictedCone => write!(f, "Port Restricted Cone NAT"),
            Self::Symmetric => write!(f, "Symmetric NAT"),
            Self::PortRestrictedOrSymmetricUndetermined => {
                write!(f, "Port Restricted Cone or Symmetric NAT (undetermined)")
            }
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Accumulated probe outcomes for one classification run.
///
/// The log is the pure half of the engine: record outcomes one test at a
/// time, ask [`ProbeLog::next_step`] which probe the procedure still
/// needs, and read the verdict off [`ProbeLog::classify`]. An interactive
/// caller can drive this incrementally; [`NatDetector::detect`] drives it
/// in one go.
#[derive(Debug, Clone, Default)]
pub struct ProbeLog {
    /// Test I outcome: `Some(None)` means it ran and failed
    test1: Option<Option<MappedAddress>>,
    /// Whether Test II saw any response
    test2_responded: Option<bool>,
    /// Whether Test III saw any response
    test3_responded: Option<bool>,
    /// Test IV outcome
    test4: Option<Option<MappedAddress>>,
}

impl ProbeLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record Test I: the primary server's view of our mapping, or `None`
    /// if the probe failed.
    pub fn record_test1(&mut self, mapped: Option<MappedAddress>) {
        self.test1 = Some(mapped);
    }

    /// Record Test II: whether any response arrived
    pub fn record_test2(&mut self, responded: bool) {
        self.test2_responded = Some(responded);
    }

    /// Record Test III: whether any response arrived
    pub fn record_test3(&mut self, responded: bool) {
        self.test3_responded = Some(responded);
    }

    /// Record Test IV: the secondary server's view, or `None` on failure
    pub fn record_test4(&mut self, mapped: Option<MappedAddress>) {
        self.test4 = Some(mapped);
    }

    /// Mapped address recorded by Test I, if it succeeded
    #[must_use]
    pub fn mapped_address(&self) -> Option<MappedAddress> {
        self.test1.flatten()
    }

    /// The next probe the decision procedure needs, or `None` once the
    /// classification is settled. Never yields [`TestId::TestTcp1`]; the
    /// TCP variant of Test I sits outside the decision tree.
    #[must_use]
    pub fn next_step(&self) -> Option<TestId> {
        match self.test1 {
            None => return Some(TestId::Test1),
            Some(None) => return None,
            Some(Some(_)) => {}
        }
        match self.test2_responded {
            None => return Some(TestId::Test2),
            Some(true) => return None,
            Some(false) => {}
        }
        match self.test3_responded {
            None => return Some(TestId::Test3),
            Some(true) => return None,
            Some(false) => {}
        }
        match self.test4 {
            None => Some(TestId::Test4),
            Some(_) => None,
        }
    }

    /// Fold the recorded outcomes into a classification.
    ///
    /// Total: every combination of outcomes maps to exactly one value,
    /// with `Unknown` covering both a failed Test I and a log whose
    /// procedure was abandoned mid-way.
    #[must_use]
    pub fn classify(&self) -> NatClassification {
        let Some(Some(mapped1)) = &self.test1 else {
            return NatClassification::Unknown;
        };
        match (self.test2_responded, self.test3_responded) {
            (Some(true), _) => NatClassification::OpenOrFullCone,
            (Some(false), Some(true)) => NatClassification::RestrictedCone,
            (Some(false), Some(false)) => match &self.test4 {
                Some(Some(mapped4)) if mapped4.same_endpoint(mapped1) => {
                    NatClassification::PortRestrictedCone
                }
                Some(Some(_)) => NatClassification::Symmetric,
                // Test IV failed or never ran
                _ => NatClassification::PortRestrictedOrSymmetricUndetermined,
            },
            _ => NatClassification::Unknown,
        }
    }
}

/// Runs the four-test sequence against a primary and a secondary server
#[derive(Debug, Clone)]
pub struct NatDetector {
    primary: ServerEndpoint,
    secondary: ServerEndpoint,
}

impl NatDetector {
    /// Detector probing `primary` for Tests I-III and `secondary` for
    /// Test IV. The two must be distinct servers for Test IV to mean
    /// anything.
    #[must_use]
    pub fn new(primary: ServerEndpoint, secondary: ServerEndpoint) -> Self {
        Self { primary, secondary }
    }

    /// Run the decision procedure: one probe in flight at a time, each
    /// with a fresh socket and transaction ID, short-circuiting as soon
    /// as the classification is settled.
    pub async fn detect(&self) -> NatClassification {
        let mut log = ProbeLog::new();
        let primary = StunClient::new(self.primary.clone());

        info!(server = %self.primary.authority(), "test I: binding request to primary");
        match primary.discover_mapped_address(Transport::Udp).await {
            Ok(mapped) => log.record_test1(Some(mapped)),
            Err(e) => {
                warn!(server = %self.primary.authority(), error = %e, "test I failed");
                log.record_test1(None);
                return log.classify();
            }
        }

        info!(server = %self.primary.authority(), "test II: change IP and port");
        log.record_test2(
            primary
                .probe_change_request(ChangeRequest::ip_and_port())
                .await,
        );

        if log.next_step() == Some(TestId::Test3) {
            info!(server = %self.primary.authority(), "test III: change port only");
            log.record_test3(primary.probe_change_request(ChangeRequest::port_only()).await);
        }

        if log.next_step() == Some(TestId::Test4) {
            info!(server = %self.secondary.authority(), "test IV: binding request to secondary");
            let secondary = StunClient::new(self.secondary.clone());
            match secondary.discover_mapped_address(Transport::Udp).await {
                Ok(mapped) => log.record_test4(Some(mapped)),
                Err(e) => {
                    warn!(server = %self.secondary.authority(), error = %e, "test IV failed");
                    log.record_test4(None);
                }
            }
        }

        let classification = log.classify();
        info!(%classification, "nat classification complete");
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AddressSource;

    fn mapping(ip: &str, port: u16) -> MappedAddress {
        MappedAddress {
            ip: ip.parse().unwrap(),
            port,
            source: AddressSource::XorMapped,
        }
    }

    #[test]
    fn test_i_failure_is_unknown() {
        let mut log = ProbeLog::new();
        log.record_test1(None);
        assert_eq!(log.next_step(), None);
        assert_eq!(log.classify(), NatClassification::Unknown);
    }

    #[test]
    fn test_ii_response_is_open_or_full_cone() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(true);
        assert_eq!(log.next_step(), None);
        assert_eq!(log.classify(), NatClassification::OpenOrFullCone);
    }

    #[test]
    fn test_iii_response_is_restricted_cone() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(false);
        log.record_test3(true);
        assert_eq!(log.next_step(), None);
        assert_eq!(log.classify(), NatClassification::RestrictedCone);
    }

    #[test]
    fn test_iv_same_mapping_is_port_restricted_cone() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(false);
        log.record_test3(false);
        log.record_test4(Some(mapping("203.0.113.4", 40000)));
        assert_eq!(log.classify(), NatClassification::PortRestrictedCone);
    }

    #[test]
    fn test_iv_different_mapping_is_symmetric() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(false);
        log.record_test3(false);
        log.record_test4(Some(mapping("203.0.113.4", 40001)));
        assert_eq!(log.classify(), NatClassification::Symmetric);
    }

    #[test]
    fn test_iv_failure_is_undetermined() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(false);
        log.record_test3(false);
        log.record_test4(None);
        assert_eq!(
            log.classify(),
            NatClassification::PortRestrictedOrSymmetricUndetermined
        );
    }

    #[test]
    fn test_mapping_comparison_ignores_attribute_source() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(false);
        log.record_test3(false);
        log.record_test4(Some(MappedAddress {
            source: AddressSource::Mapped,
            ..mapping("203.0.113.4", 40000)
        }));
        assert_eq!(log.classify(), NatClassification::PortRestrictedCone);
    }

    #[test]
    fn test_next_step_sequencing() {
        let mut log = ProbeLog::new();
        assert_eq!(log.next_step(), Some(TestId::Test1));
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        assert_eq!(log.next_step(), Some(TestId::Test2));
        log.record_test2(false);
        assert_eq!(log.next_step(), Some(TestId::Test3));
        log.record_test3(false);
        assert_eq!(log.next_step(), Some(TestId::Test4));
        log.record_test4(None);
        assert_eq!(log.next_step(), None);
    }

    #[test]
    fn test_ii_response_short_circuits_the_rest() {
        let mut log = ProbeLog::new();
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        log.record_test2(true);
        // Procedure settled; III and IV are never requested
        assert_eq!(log.next_step(), None);
    }

    #[test]
    fn test_incomplete_log_classifies_as_unknown() {
        let mut log = ProbeLog::new();
        assert_eq!(log.classify(), NatClassification::Unknown);
        log.record_test1(Some(mapping("203.0.113.4", 40000)));
        assert_eq!(log.classify(), NatClassification::Unknown);
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(
            NatClassification::OpenOrFullCone.to_string(),
            "Open Internet or Full Cone NAT"
        );
        assert_eq!(
            NatClassification::Symmetric.to_string(),
            "Symmetric NAT"
        );
    }
}
