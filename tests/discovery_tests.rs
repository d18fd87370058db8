use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, DuplexStream};

use portprobe::discovery::{alive_hosts, DiscoveryOptions, DiscoverySweep, DISCOVERY_PORTS};
use portprobe::engine::Dialer;
use portprobe::orchestrator::run_discovery;
use portprobe::progress::LiveStats;

/// Accepts a single address and records every attempt.
#[derive(Debug)]
struct OneOpen {
    open: SocketAddr,
    attempts: Arc<Mutex<Vec<SocketAddr>>>,
}

#[async_trait]
impl Dialer for OneOpen {
    type Stream = DuplexStream;

    async fn dial(&self, addr: SocketAddr, _timeout: Duration) -> io::Result<DuplexStream> {
        self.attempts.lock().unwrap().push(addr);
        if addr == self.open {
            Ok(duplex(64).0)
        } else {
            Err(io::ErrorKind::TimedOut.into())
        }
    }
}

fn sweep_with(open: &str) -> (DiscoverySweep<OneOpen>, Arc<Mutex<Vec<SocketAddr>>>) {
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let dialer = OneOpen {
        open: open.parse().unwrap(),
        attempts: attempts.clone(),
    };
    let options = DiscoveryOptions {
        resolve_names: false,
        concurrency: 2,
        ..DiscoveryOptions::default()
    };
    (DiscoverySweep::with_dialer(dialer, options), attempts)
}

fn hosts() -> Vec<String> {
    ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[tokio::test]
async fn only_the_listening_host_is_alive() {
    let (sweep, attempts) = sweep_with("10.0.0.2:443");
    let mut statuses = sweep.sweep(&hosts(), ()).await;
    statuses.sort_by(|a, b| a.ip.cmp(&b.ip));

    assert_eq!(statuses.len(), 3);
    assert_eq!(alive_hosts(&statuses), vec!["10.0.0.2"]);
    assert!(!statuses[0].is_alive && !statuses[2].is_alive);
    assert_eq!(statuses[1].hostname, None);

    let attempts = attempts.lock().unwrap();
    let tried = |ip: &str| {
        attempts
            .iter()
            .filter(|a| a.ip().to_string() == ip)
            .map(|a| a.port())
            .collect::<Vec<_>>()
    };
    // Stops at the first port that answers.
    assert_eq!(tried("10.0.0.2"), vec![80, 443]);
    assert_eq!(tried("10.0.0.1"), DISCOVERY_PORTS.to_vec());
}

#[tokio::test]
async fn progress_counts_hosts_and_live_ones() {
    let (sweep, _) = sweep_with("10.0.0.3:22");
    let stats = Arc::new(LiveStats::new(3));
    let mut updates = 0;
    let statuses = run_discovery(&sweep, &hosts(), stats.clone(), |_| updates += 1).await;

    assert_eq!(statuses.len(), 3);
    assert_eq!(updates, 3);
    assert_eq!(stats.scanned(), 3);
    assert_eq!(stats.open(), 1);
}

#[tokio::test]
async fn unresolvable_host_is_down_without_dialing() {
    let (sweep, attempts) = sweep_with("10.0.0.2:80");
    let hosts = vec!["no-such-host.invalid".to_string()];
    let statuses = sweep.sweep(&hosts, ()).await;

    assert_eq!(statuses.len(), 1);
    assert!(!statuses[0].is_alive);
    assert!(attempts.lock().unwrap().is_empty());
}
