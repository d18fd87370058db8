//! Target expressions: turning what the user typed into host strings and addresses.
use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

use crate::error::{ScanError, ScanResult};

/// Expand a target expression into a list of host strings.
///
/// Accepted forms:
/// - `@path` reads one expression per line from a file (`#` starts a comment)
/// - CIDR such as `192.168.1.0/24` (network and broadcast addresses excluded)
/// - last-octet range such as `192.168.1.10-20`
/// - comma separated list, each item being any of the forms above
/// - a single IP address or hostname
pub fn parse_targets(expr: &str) -> Result<Vec<String>> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(ScanError::InvalidTarget("empty target".into()).into());
    }

    if let Some(path) = expr.strip_prefix('@') {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read targets file: {path}"))?;
        let mut out = Vec::new();
        for line in content.lines() {
            let line = line.split('#').next().map(str::trim).unwrap_or("");
            if !line.is_empty() {
                out.extend(parse_targets(line)?);
            }
        }
        return Ok(out);
    }

    if expr.contains(',') {
        let mut out = Vec::new();
        for item in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            out.extend(parse_targets(item)?);
        }
        return Ok(out);
    }

    if expr.contains('/') {
        let net: IpNet = expr
            .parse()
            .map_err(|e| ScanError::InvalidTarget(format!("{expr}: {e}")))?;
        let hosts: Vec<String> = expand_cidr_to_ips(net)
            .into_iter()
            .map(|ip| ip.to_string())
            .collect();
        if hosts.is_empty() {
            return Err(ScanError::InvalidTarget(format!("{expr}: no IPv4 hosts")).into());
        }
        return Ok(hosts);
    }

    if let Some(range) = parse_last_octet_range(expr)? {
        return Ok(range);
    }

    Ok(vec![expr.to_string()])
}

/// `a.b.c.x-y` → every address from `a.b.c.x` to `a.b.c.y`.
///
/// Returns `Ok(None)` when the expression is not shaped like a range, so hostnames
/// containing dashes fall through to the single-host case.
fn parse_last_octet_range(expr: &str) -> Result<Option<Vec<String>>> {
    let Some((base, tail)) = expr.rsplit_once('.') else {
        return Ok(None);
    };
    let Some((a, b)) = tail.split_once('-') else {
        return Ok(None);
    };
    if format!("{base}.0").parse::<Ipv4Addr>().is_err() {
        return Ok(None);
    }
    let start: u8 = a
        .trim()
        .parse()
        .map_err(|e| ScanError::InvalidTarget(format!("{expr}: invalid start: {e}")))?;
    let end: u8 = b
        .trim()
        .parse()
        .map_err(|e| ScanError::InvalidTarget(format!("{expr}: invalid end: {e}")))?;
    if start > end {
        return Err(ScanError::InvalidTarget(format!("{expr}: start > end")).into());
    }
    Ok(Some((start..=end).map(|o| format!("{base}.{o}")).collect()))
}

/// Resolve a host string to the address that will be probed.
///
/// IP literals are returned as-is; names go through the system resolver and the first
/// IPv4 answer is preferred.
pub async fn resolve_host(host: &str) -> ScanResult<IpAddr> {
    if host.trim().is_empty() {
        return Err(ScanError::InvalidTarget("empty target".into()));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let unresolvable = || ScanError::UnresolvableHost {
        host: host.to_string(),
    };
    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|_| unresolvable())?
        .map(|sa| sa.ip())
        .collect();
    let ip = addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(unresolvable)?;
    debug!(%host, %ip, "resolved target");
    Ok(ip)
}

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 CIDR network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed.
pub fn detect_local_cidrs() -> Result<Vec<IpNet>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(ip));
        }
    }
    let mut cidrs: Vec<IpNet> = set.into_iter().map(IpNet::V4).collect();
    // Sort for stable output
    cidrs.sort_by_key(|n| match n {
        IpNet::V4(n4) => (u32::from(n4.network()), n4.prefix_len()),
        IpNet::V6(_) => (0, 0),
    });
    Ok(cidrs)
}

/// Expand a CIDR into individual IP addresses suitable for host scanning.
///
/// For IPv4, excludes the network and broadcast addresses (except for /31 and /32, where
/// every address is a host). IPv6 networks are too large to sweep and yield nothing.
pub fn expand_cidr_to_ips(cidr: IpNet) -> Vec<IpAddr> {
    match cidr {
        IpNet::V4(n4) => n4.hosts().map(IpAddr::V4).collect(),
        IpNet::V6(_) => Vec::new(),
    }
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}
