//! TCP "ping" sweep over a list of hosts.
//!
//! Unlike the port engine, a unit here is a whole host: its worker walks a short list of
//! common ports in order and stops at the first one that accepts a connection.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::engine::{Collector, Dialer, ProbeObserver, TcpDialer, UnitDone, MAX_CONCURRENCY};
use crate::targets::resolve_host;
use crate::types::HostStatus;

/// Ports tried, in order, to decide whether a host is up.
pub const DISCOVERY_PORTS: &[u16] = &[80, 443, 22, 21, 25, 3389];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub ports: Vec<u16>,
    /// Connect timeout per port.
    pub timeout: Duration,
    pub concurrency: usize,
    /// Look up a PTR name for hosts found alive.
    pub resolve_names: bool,
    pub name_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            ports: DISCOVERY_PORTS.to_vec(),
            timeout: Duration::from_millis(1000),
            concurrency: 100,
            resolve_names: true,
            name_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct DiscoverySweep<D = TcpDialer> {
    dialer: Arc<D>,
    options: DiscoveryOptions,
}

impl DiscoverySweep<TcpDialer> {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self::with_dialer(TcpDialer, options)
    }
}

impl<D: Dialer> DiscoverySweep<D> {
    pub fn with_dialer(dialer: D, options: DiscoveryOptions) -> Self {
        Self {
            dialer: Arc::new(dialer),
            options,
        }
    }

    /// Check every host, at most `concurrency` at a time.
    ///
    /// One [`HostStatus`] per input host, in completion order.
    pub async fn sweep<O: ProbeObserver>(&self, hosts: &[String], observer: O) -> Vec<HostStatus> {
        let observer = Arc::new(observer);
        let collector = Collector::new();
        let sem = Arc::new(Semaphore::new(
            self.options.concurrency.clamp(1, MAX_CONCURRENCY),
        ));
        let options = Arc::new(self.options.clone());
        let mut set = JoinSet::new();

        for host in hosts {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let host = host.clone();
            let dialer = self.dialer.clone();
            let options = options.clone();
            let collector = collector.clone();
            let observer = observer.clone();

            set.spawn(async move {
                let _permit = permit;
                let status = ping_host(dialer.as_ref(), &host, &options).await;
                let open = status.is_alive;
                collector.push(status).await;
                observer.unit_completed(UnitDone { open });
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "discovery task failed");
            }
        }

        drop(observer);
        collector.take().await
    }
}

async fn ping_host<D: Dialer>(dialer: &D, host: &str, options: &DiscoveryOptions) -> HostStatus {
    let mut status = HostStatus::down(host);
    let ip = match resolve_host(host).await {
        Ok(ip) => ip,
        Err(e) => {
            trace!(%host, error = %e, "skipping host");
            return status;
        }
    };

    for &port in &options.ports {
        let start = Instant::now();
        if dialer
            .dial(SocketAddr::new(ip, port), options.timeout)
            .await
            .is_ok()
        {
            status.is_alive = true;
            status.rtt = start.elapsed();
            debug!(%host, port, rtt_ms = status.rtt.as_millis() as u64, "host is up");
            if options.resolve_names {
                status.hostname = reverse_lookup(ip, options.name_timeout).await;
            }
            break;
        }
    }
    status
}

/// PTR lookup through the system resolver, bounded by `timeout`.
pub async fn reverse_lookup(ip: IpAddr, timeout: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
    match time::timeout(timeout, lookup).await {
        // Resolvers without a PTR record may echo the address back.
        Ok(Ok(Ok(name))) if name != ip.to_string() => Some(name),
        _ => None,
    }
}

/// Addresses of the hosts that answered.
pub fn alive_hosts(hosts: &[HostStatus]) -> Vec<String> {
    hosts
        .iter()
        .filter(|h| h.is_alive)
        .map(|h| h.ip.clone())
        .collect()
}
