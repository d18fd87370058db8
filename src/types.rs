use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tls::CertificateInfo;

/// State of a probed port. Closed and filtered ports produce no result at all.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
}

/// One open port found on a target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub state: PortState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

impl ProbeResult {
    pub fn open(port: u16) -> Self {
        Self {
            port,
            state: PortState::Open,
            service: None,
            banner: None,
        }
    }
}

/// Liveness of one host as seen by a discovery sweep.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    pub ip: String,
    pub is_alive: bool,
    #[serde(rename = "rtt_ms", with = "duration_ms")]
    pub rtt: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl HostStatus {
    pub fn down(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            is_alive: false,
            rtt: Duration::ZERO,
            hostname: None,
        }
    }
}

/// Everything known about one finished target scan; this is what writers serialize.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScanReport {
    pub target: String,
    pub ip: String,
    pub total_ports: u64,
    pub open_ports: u64,
    pub elapsed_ms: u64,
    pub started_at: String,
    pub results: Vec<ProbeResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<CertificateInfo>,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
