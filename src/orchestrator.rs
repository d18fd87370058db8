//! Per-target scan sequencing: validate, resolve, order, probe, track progress.
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Deserialize;
use time::{format_description::well_known, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::discovery::DiscoverySweep;
use crate::engine::{Dialer, ProbeEngine, ProbeOptions, TcpDialer, UnitDone};
use crate::error::{ScanError, ScanResult};
use crate::pacing::{Pacer, PacingConfig};
use crate::ports;
use crate::progress::LiveStats;
use crate::targets::resolve_host;
use crate::tls::{self, CertificateInfo};
use crate::types::{HostStatus, ProbeResult, ScanReport};

/// Caller choices layered over a [`Config`]. `None`/`false` leaves the config value alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlanOverrides {
    pub ports: Option<Vec<u16>>,
    pub profile: Option<String>,
    pub concurrency: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub service_detection: bool,
    pub banner_grab: bool,
    pub stealth: bool,
    pub inspect_tls: bool,
}

/// Everything needed to scan one target, already merged and ready to validate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub ports: Vec<u16>,
    pub probe: ProbeOptions,
    pub pacing: PacingConfig,
    pub inspect_tls: bool,
}

impl ScanPlan {
    /// Merge config defaults, then the profile, then stealth settings, then explicit
    /// overrides. Later layers win.
    pub fn resolve(config: &Config, overrides: &PlanOverrides) -> Result<Self> {
        let mut probe = config.probe_options();
        let mut port_list = None;

        if let Some(name) = overrides.profile.as_deref() {
            let profile = config
                .profile(name)
                .ok_or_else(|| anyhow!("unknown profile: {name}"))?;
            port_list = Some(profile.port_list()?);
            probe.concurrency = profile.concurrency;
            probe.timeout = Duration::from_millis(profile.timeout_ms);
        }

        if overrides.stealth {
            probe.concurrency = config.stealth.concurrency;
            probe.timeout = Duration::from_millis(config.stealth.timeout_ms);
        }
        if let Some(c) = overrides.concurrency {
            probe.concurrency = c;
        }
        if let Some(ms) = overrides.timeout_ms {
            probe.timeout = Duration::from_millis(ms);
        }
        if let Some(list) = &overrides.ports {
            port_list = Some(list.clone());
        }
        probe.service_detection |= overrides.service_detection;
        probe.banner_grab |= overrides.banner_grab;

        let plan = Self {
            ports: port_list.unwrap_or_else(ports::default_ports),
            probe,
            pacing: config.pacing(overrides.stealth),
            inspect_tls: overrides.inspect_tls,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> ScanResult<()> {
        if self.ports.is_empty() {
            return Err(ScanError::EmptyPortList);
        }
        if self.ports.contains(&0) {
            return Err(ScanError::InvalidPorts("port 0 is not scannable".into()));
        }
        if self.probe.concurrency == 0 {
            return Err(ScanError::ZeroConcurrency);
        }
        self.pacing.validate()
    }
}

/// Runs validated plans against targets, one target at a time.
#[derive(Debug)]
pub struct Orchestrator<D = TcpDialer> {
    engine: ProbeEngine<D>,
    ports: Vec<u16>,
    pacer: Pacer,
    inspect_tls: bool,
    tls_timeout: Duration,
}

impl Orchestrator<TcpDialer> {
    pub fn new(plan: ScanPlan, seed: Option<u64>) -> ScanResult<Self> {
        Self::with_dialer(TcpDialer, plan, seed)
    }
}

impl<D: Dialer> Orchestrator<D> {
    pub fn with_dialer(dialer: D, plan: ScanPlan, seed: Option<u64>) -> ScanResult<Self> {
        plan.validate()?;
        let pacer = match seed {
            Some(seed) => Pacer::with_seed(plan.pacing, seed),
            None => Pacer::new(plan.pacing),
        };
        let tls_timeout = plan.probe.timeout.max(Duration::from_secs(5));
        Ok(Self {
            engine: ProbeEngine::with_dialer(dialer, plan.probe),
            ports: plan.ports,
            pacer,
            inspect_tls: plan.inspect_tls,
            tls_timeout,
        })
    }

    pub fn total_units(&self) -> u64 {
        self.ports.len() as u64
    }

    pub fn probe_options(&self) -> &ProbeOptions {
        self.engine.options()
    }

    pub fn pacing(&self) -> &PacingConfig {
        self.pacer.config()
    }

    /// Fresh counters sized for one scan of this plan.
    pub fn new_stats(&self) -> Arc<LiveStats> {
        Arc::new(LiveStats::new(self.total_units()))
    }

    pub async fn scan_target(&mut self, target: &str) -> ScanResult<ScanReport> {
        let stats = self.new_stats();
        self.scan_target_with(target, stats, |_| {}).await
    }

    /// Scan one target, feeding `stats` and calling `on_progress` after every unit.
    ///
    /// Resolution failures are returned before any probe is sent. In stealth mode the
    /// pacing delay is taken here, once per completed unit.
    pub async fn scan_target_with<F>(
        &mut self,
        target: &str,
        stats: Arc<LiveStats>,
        mut on_progress: F,
    ) -> ScanResult<ScanReport>
    where
        F: FnMut(&LiveStats),
    {
        let ip = resolve_host(target).await?;
        let order = self.pacer.order(&self.ports);
        let opts = self.engine.options();
        info!(
            %target,
            %ip,
            ports = order.len(),
            concurrency = opts.concurrency,
            timeout_ms = opts.timeout.as_millis() as u64,
            stealth = self.pacer.config().enabled,
            "starting port scan"
        );

        let started_at = now_rfc3339();
        let start = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<UnitDone>();
        let engine = &self.engine;
        let pacer = &mut self.pacer;

        let drain = async {
            while let Some(done) = rx.recv().await {
                if done.open {
                    stats.increment_open();
                }
                stats.increment_scanned();
                on_progress(&stats);
                pacer.apply_delay().await;
            }
        };
        let (results, ()) = tokio::join!(engine.scan(ip, &order, tx), drain);

        let certificates = if self.inspect_tls {
            self.inspect_certificates(ip, target, &results).await
        } else {
            Vec::new()
        };

        let elapsed = start.elapsed();
        info!(
            %target,
            open = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "{}",
            stats.summary()
        );

        Ok(ScanReport {
            target: target.to_string(),
            ip: ip.to_string(),
            total_ports: order.len() as u64,
            open_ports: results.len() as u64,
            elapsed_ms: elapsed.as_millis() as u64,
            started_at,
            results,
            certificates,
        })
    }

    async fn inspect_certificates(
        &self,
        ip: IpAddr,
        target: &str,
        results: &[ProbeResult],
    ) -> Vec<CertificateInfo> {
        let tls_ports = &self.engine.options().banner.tls_ports;
        let mut out = Vec::new();
        for r in results.iter().filter(|r| tls_ports.contains(&r.port)) {
            match tls::fetch_certificate(ip, r.port, target, self.tls_timeout).await {
                Ok(info) => out.push(info),
                Err(e) => warn!(
                    %target,
                    port = r.port,
                    error = %format!("{e:#}"),
                    "certificate inspection failed"
                ),
            }
        }
        out
    }
}

/// Sweep `hosts`, feeding `stats` (one unit per host) and `on_progress` as hosts finish.
pub async fn run_discovery<D, F>(
    sweep: &DiscoverySweep<D>,
    hosts: &[String],
    stats: Arc<LiveStats>,
    mut on_progress: F,
) -> Vec<HostStatus>
where
    D: Dialer,
    F: FnMut(&LiveStats),
{
    info!(hosts = hosts.len(), "starting discovery sweep");
    let (tx, mut rx) = mpsc::unbounded_channel::<UnitDone>();
    let drain = async {
        while let Some(done) = rx.recv().await {
            if done.open {
                stats.increment_open();
            }
            stats.increment_scanned();
            on_progress(&stats);
        }
    };
    let (hosts, ()) = tokio::join!(sweep.sweep(hosts, tx), drain);
    info!(alive = stats.open(), total = hosts.len(), "discovery sweep finished");
    hosts
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scan_the_privileged_range() {
        let plan = ScanPlan::resolve(&Config::default(), &PlanOverrides::default()).unwrap();
        assert_eq!(plan.ports.len(), 1024);
        assert_eq!(plan.probe.concurrency, 100);
        assert!(!plan.pacing.enabled);
    }

    #[test]
    fn layers_apply_in_order() {
        let cfg = Config::default();
        let plan = ScanPlan::resolve(
            &cfg,
            &PlanOverrides {
                profile: Some("quick".into()),
                stealth: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.ports, crate::ports::QUICK_PORTS);
        assert_eq!(plan.probe.concurrency, cfg.stealth.concurrency);
        assert_eq!(plan.probe.timeout, Duration::from_millis(cfg.stealth.timeout_ms));
        assert!(plan.pacing.enabled);

        let plan = ScanPlan::resolve(
            &cfg,
            &PlanOverrides {
                profile: Some("quick".into()),
                stealth: true,
                concurrency: Some(3),
                ports: Some(vec![8080]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(plan.probe.concurrency, 3);
        assert_eq!(plan.ports, vec![8080]);
    }

    #[test]
    fn bad_inputs_fail_before_scanning() {
        let cfg = Config::default();
        let unknown = PlanOverrides {
            profile: Some("turbo".into()),
            ..Default::default()
        };
        assert!(ScanPlan::resolve(&cfg, &unknown).is_err());

        let empty = PlanOverrides {
            ports: Some(vec![]),
            ..Default::default()
        };
        let err = ScanPlan::resolve(&cfg, &empty).unwrap_err();
        assert_eq!(err.downcast_ref::<ScanError>(), Some(&ScanError::EmptyPortList));

        let zero = PlanOverrides {
            concurrency: Some(0),
            ..Default::default()
        };
        let err = ScanPlan::resolve(&cfg, &zero).unwrap_err();
        assert_eq!(err.downcast_ref::<ScanError>(), Some(&ScanError::ZeroConcurrency));
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let ts = now_rfc3339();
        assert!(ts.contains('T'), "{ts}");
        assert!(ts.ends_with('Z'), "{ts}");
    }
}
