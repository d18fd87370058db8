//! Bounded-concurrency TCP connect engine.
//!
//! One task per (host, port) unit, admitted through a `Semaphore` so that at most
//! `concurrency` connection attempts are in flight. Each task owns its permit, so the slot
//! is returned on every exit path. Open ports are pushed into a mutex-guarded collector;
//! every finished unit, open or not, is reported to a [`ProbeObserver`].
use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::services;
use crate::types::ProbeResult;

/// Upper bound on the worker count, whatever the caller asks for.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Longest banner kept, in characters, before the `...` marker.
pub const BANNER_MAX_CHARS: usize = 50;

const BANNER_BUF_LEN: usize = 1024;
const HTTP_PROBE: &[u8] = b"HEAD / HTTP/1.0\r\n\r\n";

/// Opens connections for the engine. [`TcpDialer`] is the real thing; tests plug in
/// in-memory streams.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `addr`, giving up after `timeout`.
    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> io::Result<Self::Stream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(res) => res,
            Err(_) => Err(io::ErrorKind::TimedOut.into()),
        }
    }
}

/// Completion token, one per probed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitDone {
    pub open: bool,
}

/// Notified once for every unit the engine finishes, in completion order.
pub trait ProbeObserver: Send + Sync + 'static {
    fn unit_completed(&self, done: UnitDone);
}

/// Ignores all notifications.
impl ProbeObserver for () {
    fn unit_completed(&self, _done: UnitDone) {}
}

impl<T: ProbeObserver> ProbeObserver for Arc<T> {
    fn unit_completed(&self, done: UnitDone) {
        (**self).unit_completed(done)
    }
}

/// Progress channel. The engine owns the sender for the duration of a scan and drops it
/// when the last unit has finished, which closes the channel exactly once.
impl ProbeObserver for mpsc::UnboundedSender<UnitDone> {
    fn unit_completed(&self, done: UnitDone) {
        // A receiver that went away only loses display updates.
        let _ = self.send(done);
    }
}

/// How open ports are asked for a banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BannerPolicy {
    /// Ports that only talk after a request; a `HEAD` line is written first.
    pub http_ports: Vec<u16>,
    /// Ports speaking TLS from the first byte; never read in plaintext.
    pub tls_ports: Vec<u16>,
    /// Read deadline, separate from the connect timeout.
    pub read_timeout: Duration,
}

impl Default for BannerPolicy {
    fn default() -> Self {
        Self {
            http_ports: vec![80, 8080, 8000, 8888],
            tls_ports: vec![443, 8443],
            read_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub concurrency: usize,
    pub service_detection: bool,
    pub banner_grab: bool,
    pub banner: BannerPolicy,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            concurrency: 100,
            service_detection: false,
            banner_grab: false,
            banner: BannerPolicy::default(),
        }
    }
}

/// Append-only sink shared by workers. Workers can only `push`; the vector itself is
/// handed out once, after every worker has finished.
#[derive(Debug)]
pub(crate) struct Collector<T> {
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Collector<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) async fn push(&self, item: T) {
        self.inner.lock().await.push(item);
    }

    pub(crate) async fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.inner.lock().await)
    }
}

/// The port scanning worker pool.
#[derive(Debug)]
pub struct ProbeEngine<D = TcpDialer> {
    dialer: Arc<D>,
    options: ProbeOptions,
}

impl ProbeEngine<TcpDialer> {
    pub fn new(options: ProbeOptions) -> Self {
        Self::with_dialer(TcpDialer, options)
    }
}

impl<D: Dialer> ProbeEngine<D> {
    pub fn with_dialer(dialer: D, options: ProbeOptions) -> Self {
        Self {
            dialer: Arc::new(dialer),
            options,
        }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Probe every port in `ports` on `host` and return the open ones, sorted by port.
    ///
    /// Returns once every unit has completed. `observer` gets exactly one notification per
    /// entry of `ports` and is dropped before this function returns.
    pub async fn scan<O: ProbeObserver>(
        &self,
        host: IpAddr,
        ports: &[u16],
        observer: O,
    ) -> Vec<ProbeResult> {
        let observer = Arc::new(observer);
        let collector = Collector::new();
        let sem = Arc::new(Semaphore::new(
            self.options.concurrency.clamp(1, MAX_CONCURRENCY),
        ));
        let options = Arc::new(self.options.clone());
        let mut set = JoinSet::new();

        for &port in ports {
            let permit = match sem.clone().acquire_owned().await {
                Ok(permit) => permit,
                // The semaphore lives in this function and is never closed.
                Err(_) => break,
            };
            let dialer = self.dialer.clone();
            let options = options.clone();
            let collector = collector.clone();
            let observer = observer.clone();

            set.spawn(async move {
                let _permit = permit; // keep permit until the unit completes

                let result = probe_port(dialer.as_ref(), host, port, &options).await;
                let open = result.is_some();
                if let Some(result) = result {
                    collector.push(result).await;
                }
                observer.unit_completed(UnitDone { open });
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(%host, error = %e, "probe task failed");
            }
        }

        // Every task clone is gone now, so this drops the last observer handle.
        drop(observer);
        canonicalize(collector.take().await)
    }
}

/// Sort ascending by port and drop repeated ports.
pub(crate) fn canonicalize(mut results: Vec<ProbeResult>) -> Vec<ProbeResult> {
    results.sort_by_key(|r| r.port);
    let mut seen = HashSet::with_capacity(results.len());
    results.retain(|r| seen.insert(r.port));
    results
}

async fn probe_port<D: Dialer>(
    dialer: &D,
    host: IpAddr,
    port: u16,
    options: &ProbeOptions,
) -> Option<ProbeResult> {
    let addr = SocketAddr::new(host, port);
    let mut stream = match dialer.dial(addr, options.timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            // Closed, filtered, or timed out. Expected, so nothing is recorded.
            trace!(%addr, error = %e, "no connection");
            return None;
        }
    };

    let mut result = ProbeResult::open(port);
    if options.service_detection {
        result.service = Some(services::service_name(port).to_string());
    }
    if options.banner_grab {
        result.banner = grab_banner(&mut stream, port, &options.banner).await;
    }
    debug!(%addr, service = ?result.service, banner = ?result.banner, "open port");
    Some(result)
}

/// Read the first line a service offers. Any I/O failure just means no banner.
pub async fn grab_banner<S>(stream: &mut S, port: u16, policy: &BannerPolicy) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if policy.tls_ports.contains(&port) {
        return None;
    }

    let exchange = async {
        if policy.http_ports.contains(&port) {
            stream.write_all(HTTP_PROBE).await?;
        }
        let mut buf = vec![0u8; BANNER_BUF_LEN];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, io::Error>(buf)
    };

    match time::timeout(policy.read_timeout, exchange).await {
        Ok(Ok(buf)) => clean_banner(&buf),
        _ => None,
    }
}

/// First line of `raw`, capped at [`BANNER_MAX_CHARS`] with a `...` marker.
pub fn clean_banner(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let line = text
        .split(['\r', '\n'])
        .next()
        .unwrap_or_default();
    if line.is_empty() {
        return None;
    }
    if line.chars().count() > BANNER_MAX_CHARS {
        let mut cut: String = line.chars().take(BANNER_MAX_CHARS).collect();
        cut.push_str("...");
        return Some(cut);
    }
    Some(line.to_string())
}
