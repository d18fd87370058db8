use std::collections::{HashMap, HashSet};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use portprobe::engine::{BannerPolicy, Dialer, ProbeEngine, ProbeOptions, UnitDone};
use portprobe::orchestrator::{Orchestrator, ScanPlan};
use portprobe::pacing::PacingConfig;
use portprobe::ScanError;

const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 9, 8, 7));
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Accepts only the listed ports. A port mapped to `Some(reply)` answers with `reply`
/// once it has read whatever the client sent first.
#[derive(Debug, Default)]
struct MockDialer {
    open: HashMap<u16, Option<&'static [u8]>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    hold: Duration,
}

impl MockDialer {
    fn with_open(ports: &[u16]) -> Self {
        Self {
            open: ports.iter().map(|&p| (p, None)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Dialer for MockDialer {
    type Stream = DuplexStream;

    async fn dial(&self, addr: SocketAddr, _timeout: Duration) -> io::Result<DuplexStream> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let Some(reply) = self.open.get(&addr.port()) else {
            return Err(io::ErrorKind::ConnectionRefused.into());
        };
        let (client, mut server) = duplex(1024);
        if let Some(reply) = *reply {
            tokio::spawn(async move {
                let mut req = [0u8; 64];
                let _ = server.read(&mut req).await;
                let _ = server.write_all(reply).await;
                let _ = server.shutdown().await;
            });
        }
        Ok(client)
    }
}

fn options(concurrency: usize) -> ProbeOptions {
    ProbeOptions {
        timeout: Duration::from_millis(200),
        concurrency,
        ..ProbeOptions::default()
    }
}

#[tokio::test]
async fn only_open_ports_are_reported_with_services() {
    let engine = ProbeEngine::with_dialer(
        MockDialer::with_open(&[22, 80]),
        ProbeOptions {
            service_detection: true,
            ..options(16)
        },
    );
    let ports: Vec<u16> = (20..=90).collect();
    let results = engine.scan(HOST, &ports, ()).await;

    let got: Vec<(u16, Option<&str>)> = results
        .iter()
        .map(|r| (r.port, r.service.as_deref()))
        .collect();
    assert_eq!(got, vec![(22, Some("SSH")), (80, Some("HTTP"))]);
    assert!(results.iter().all(|r| r.banner.is_none()));
}

#[tokio::test]
async fn http_banner_through_mock() {
    let mut dialer = MockDialer::default();
    dialer
        .open
        .insert(80, Some(&b"HTTP/1.1 200 OK\r\nServer: test\r\n\r\n"[..]));
    let engine = ProbeEngine::with_dialer(
        dialer,
        ProbeOptions {
            banner_grab: true,
            ..options(4)
        },
    );
    let results = engine.scan(HOST, &[80, 81], ()).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].banner.as_deref(), Some("HTTP/1.1 200 OK"));
}

#[tokio::test]
async fn http_banner_from_real_listener() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut req = [0u8; 64];
        let _ = sock.read(&mut req).await;
        sock.write_all(b"HTTP/1.1 200 OK\r\nServer: test\r\n\r\n")
            .await
            .unwrap();
    });

    let engine = ProbeEngine::new(ProbeOptions {
        banner_grab: true,
        banner: BannerPolicy {
            http_ports: vec![port],
            ..BannerPolicy::default()
        },
        ..options(4)
    });
    let results = engine.scan(LOCALHOST, &[port], ()).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].banner.as_deref(), Some("HTTP/1.1 200 OK"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_probes_never_exceed_concurrency() {
    let dialer = MockDialer {
        hold: Duration::from_millis(2),
        ..MockDialer::with_open(&[])
    };
    let max = dialer.max_in_flight.clone();
    let engine = ProbeEngine::with_dialer(dialer, options(8));

    let ports: Vec<u16> = (1..=400).collect();
    let results = engine.scan(HOST, &ports, ()).await;

    assert!(results.is_empty());
    let peak = max.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 8, "peak in-flight {peak}");
}

#[tokio::test]
async fn one_token_per_unit_then_channel_closes() {
    let engine = ProbeEngine::with_dialer(MockDialer::with_open(&[3, 5, 7]), options(3));
    let ports: Vec<u16> = (1..=10).collect();
    let (tx, mut rx) = mpsc::unbounded_channel::<UnitDone>();

    let results = engine.scan(HOST, &ports, tx).await;

    let mut tokens = 0;
    let mut open = 0;
    while let Some(done) = rx.recv().await {
        tokens += 1;
        if done.open {
            open += 1;
        }
    }
    assert_eq!(tokens, ports.len());
    assert_eq!(open, results.len());
    assert_eq!(open, 3);
}

#[tokio::test]
async fn results_are_sorted_unique_subset() {
    let engine = ProbeEngine::with_dialer(MockDialer::with_open(&[443, 22, 8080, 9999]), options(5));
    let ports = [8080, 22, 443, 22, 1, 443, 3000];
    let (tx, mut rx) = mpsc::unbounded_channel::<UnitDone>();

    let results = engine.scan(HOST, &ports, tx).await;

    let got: Vec<u16> = results.iter().map(|r| r.port).collect();
    assert_eq!(got, vec![22, 443, 8080]);
    let input: HashSet<u16> = ports.iter().copied().collect();
    assert!(got.iter().all(|p| input.contains(p)));

    // Duplicated inputs still count as separate units.
    let mut tokens = 0;
    while rx.recv().await.is_some() {
        tokens += 1;
    }
    assert_eq!(tokens, ports.len());
}

#[tokio::test]
async fn empty_port_list_finishes_immediately() {
    let engine = ProbeEngine::with_dialer(MockDialer::with_open(&[80]), options(4));
    let (tx, mut rx) = mpsc::unbounded_channel::<UnitDone>();
    assert!(engine.scan(HOST, &[], tx).await.is_empty());
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn stealth_scan_of_localhost_listener() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let open_port = listener.local_addr().unwrap().port();
    let closed_port = {
        let l = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
        l.local_addr().unwrap().port()
    };

    let plan = ScanPlan {
        ports: vec![closed_port, open_port],
        probe: ProbeOptions {
            service_detection: true,
            ..options(2)
        },
        pacing: PacingConfig {
            enabled: true,
            randomize_order: true,
            min_delay_ms: 1,
            max_delay_ms: 3,
        },
        inspect_tls: false,
    };
    let mut orchestrator = Orchestrator::new(plan, Some(7)).unwrap();
    let stats = orchestrator.new_stats();
    let mut calls = 0;
    let report = orchestrator
        .scan_target_with("127.0.0.1", stats.clone(), |_| calls += 1)
        .await
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(stats.scanned(), 2);
    assert_eq!(stats.open(), 1);
    assert_eq!(report.total_ports, 2);
    assert_eq!(report.open_ports, 1);
    assert_eq!(report.ip, "127.0.0.1");
    assert_eq!(report.results[0].port, open_port);
    assert!(report.results[0].service.is_some());
    drop(listener);
}

#[tokio::test]
async fn unresolvable_target_fails_before_probing() {
    let dialer = MockDialer::with_open(&[80]);
    let dials = dialer.max_in_flight.clone();
    let plan = ScanPlan {
        ports: vec![80],
        probe: options(1),
        pacing: PacingConfig::default(),
        inspect_tls: false,
    };
    let mut orchestrator = Orchestrator::with_dialer(dialer, plan, None).unwrap();
    let err = orchestrator
        .scan_target("no-such-host.invalid")
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::UnresolvableHost { .. }), "{err}");
    assert_eq!(dials.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_plans_are_rejected_up_front() {
    let plan = ScanPlan {
        ports: vec![80],
        probe: options(0),
        pacing: PacingConfig::default(),
        inspect_tls: false,
    };
    assert_eq!(
        Orchestrator::new(plan.clone(), None).unwrap_err(),
        ScanError::ZeroConcurrency
    );

    let plan = ScanPlan {
        ports: vec![],
        probe: options(1),
        ..plan
    };
    assert_eq!(
        Orchestrator::new(plan, None).unwrap_err(),
        ScanError::EmptyPortList
    );
}
