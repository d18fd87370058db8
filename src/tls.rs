//! Leaf certificate inspection for open TLS ports.
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use ::time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio_native_tls::TlsConnector;
use x509_parser::prelude::*;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub port: u16,
    pub common_name: Option<String>,
    pub issuer: Option<String>,
    pub valid_from: String,
    pub valid_to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,
    pub is_expired: bool,
    pub days_to_expiry: i64,
}

/// Handshake with `ip:port` and describe the certificate the server presents.
///
/// Self-signed and mismatched certificates are accepted on purpose: the point is to
/// read them, not to trust them. `server_name` is sent as SNI.
pub async fn fetch_certificate(
    ip: IpAddr,
    port: u16,
    server_name: &str,
    timeout: Duration,
) -> Result<CertificateInfo> {
    let addr = SocketAddr::new(ip, port);
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .context("failed to build TLS connector")?;
    let connector = TlsConnector::from(connector);

    let handshake = async {
        let tcp = TcpStream::connect(addr).await?;
        let tls = connector.connect(server_name, tcp).await?;
        anyhow::Ok(tls)
    };
    let tls = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| anyhow!("TLS handshake with {addr} timed out"))?
        .with_context(|| format!("TLS handshake with {addr} failed"))?;

    let der = tls
        .get_ref()
        .peer_certificate()?
        .ok_or_else(|| anyhow!("{addr} presented no certificate"))?
        .to_der()?;
    describe_der(port, &der, OffsetDateTime::now_utc())
}

/// Extract the interesting fields of a DER certificate, relative to `now`.
pub fn describe_der(port: u16, der: &[u8], now: OffsetDateTime) -> Result<CertificateInfo> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| anyhow!("unparseable certificate: {e}"))?;

    let common_name = |name: &X509Name<'_>| {
        name.iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
    };

    let sans = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|n| match n {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let not_before = cert.validity().not_before.to_datetime();
    let not_after = cert.validity().not_after.to_datetime();

    Ok(CertificateInfo {
        port,
        common_name: common_name(cert.subject()),
        issuer: common_name(cert.issuer()),
        valid_from: not_before.date().to_string(),
        valid_to: not_after.date().to_string(),
        sans,
        is_expired: now > not_after,
        days_to_expiry: (not_after - now).whole_days(),
    })
}
