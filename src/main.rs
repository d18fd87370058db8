use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portprobe::config::{Config, ConfigSource, CONFIG_FILE_NAME};
use portprobe::discovery::DiscoverySweep;
use portprobe::orchestrator::{run_discovery, Orchestrator, PlanOverrides, ScanPlan};
use portprobe::progress::LiveStats;
use portprobe::{output, ports, server, targets};

/// portprobe: concurrent TCP connect scanner with host discovery and a stealth mode.
#[derive(Debug, Clone, Parser)]
#[command(name = "portprobe", version, about, long_about = None)]
struct Cli {
    /// Host, IP, CIDR (10.0.0.0/24), range (10.0.0.1-20), comma list, or @file.
    #[arg(short, long)]
    target: Option<String>,

    /// Ports to scan, e.g. "22,80,8000-8100".
    #[arg(short, long)]
    ports: Option<String>,

    /// File with one port or range per line.
    #[arg(long = "ports-file", conflicts_with = "ports")]
    ports_file: Option<PathBuf>,

    /// Scan the N most common ports.
    #[arg(long, conflicts_with_all = ["ports", "ports_file"])]
    top: Option<usize>,

    /// Named profile from the config (quick, normal, aggressive, or your own).
    #[arg(long)]
    profile: Option<String>,

    /// Max concurrent connection attempts.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Connect timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Label open ports with their well-known service name.
    #[arg(long)]
    service: bool,

    /// Read a banner from open ports.
    #[arg(long)]
    banner: bool,

    /// Low concurrency, shuffled order and random delays between probes.
    #[arg(long)]
    stealth: bool,

    /// Seed for the shuffle and delay generator, for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,

    /// Find live hosts instead of scanning ports. Without --target, sweeps the local networks.
    #[arg(long)]
    discover: bool,

    /// Inspect TLS certificates on open TLS ports.
    #[arg(long)]
    ssl: bool,

    /// Write results to this path; the extension picks the format (.json, .txt, .csv, .md).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Serve the HTTP API on this address, e.g. 127.0.0.1:8080.
    #[arg(long, value_name = "ADDR")]
    serve: Option<String>,

    /// Config file (defaults to $PORTPROBE_CONFIG, ./.portprobe.toml, ~/.portprobe.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default config file to the given path (or ./.portprobe.toml) and exit.
    #[arg(long = "init-config", value_name = "PATH", num_args = 0..=1, default_missing_value = CONFIG_FILE_NAME)]
    init_config: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("portprobe={level}"))),
        )
        .with_writer(io::stderr)
        .init();
}

fn progress_bar(total: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let template = format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}"
    );
    if let Ok(style) = ProgressStyle::default_bar().template(&template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn update_bar(pb: &ProgressBar, stats: &LiveStats) {
    pb.set_position(stats.scanned());
    pb.set_message(format!(
        "{:.1}% | {:.0}/s | ETA {}s | open {}",
        stats.progress_percent(),
        stats.rate(),
        stats.eta().as_secs(),
        stats.open()
    ));
}

/// `-p`, then `--ports-file`, then `--top`. `None` leaves the choice to the profile or default.
fn explicit_ports(cli: &Cli) -> Result<Option<Vec<u16>>> {
    if let Some(spec) = cli.ports.as_deref() {
        return ports::parse_port_spec(spec).map(Some);
    }
    if let Some(path) = cli.ports_file.as_deref() {
        return ports::load_ports_from_path(path).map(Some);
    }
    if let Some(n) = cli.top {
        if n == 0 {
            bail!("--top must be at least 1");
        }
        return Ok(Some(ports::top_ports(n)));
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Some(path) = cli.init_config.as_deref() {
        Config::write_default(path)?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let (config, source) = Config::load(cli.config.as_deref())?;
    match &source {
        ConfigSource::Default => info!("using built-in defaults"),
        ConfigSource::EnvPath(p) | ConfigSource::File(p) => {
            info!(path = %p.display(), "loaded config")
        }
    }

    if let Some(bind) = cli.serve.as_deref() {
        println!("API listening on http://{bind}/api (Ctrl+C to stop)");
        tokio::select! {
            res = server::spawn_server(bind, config) => res?,
            _ = tokio::signal::ctrl_c() => info!("shutting down"),
        }
        return Ok(());
    }

    // Fail on an unsupported -o extension before spending time scanning.
    if let Some(path) = cli.output.as_deref() {
        output::OutputFormat::from_path(path)?;
    }

    if cli.discover {
        return discover(&cli, &config).await;
    }

    let Some(target_expr) = cli.target.as_deref() else {
        bail!("--target is required unless --discover or --serve is given");
    };
    let hosts = targets::parse_targets(target_expr)?;

    let overrides = PlanOverrides {
        ports: explicit_ports(&cli)?,
        profile: cli.profile.clone(),
        concurrency: cli.concurrency,
        timeout_ms: cli.timeout_ms,
        service_detection: cli.service,
        banner_grab: cli.banner,
        stealth: cli.stealth,
        inspect_tls: cli.ssl,
    };
    let plan = ScanPlan::resolve(&config, &overrides)?;
    let mut orchestrator = Orchestrator::new(plan, cli.seed)?;
    if orchestrator.pacing().enabled {
        let p = orchestrator.pacing();
        println!(
            "Stealth mode: {} workers, {}-{}ms between probes",
            orchestrator.probe_options().concurrency,
            p.min_delay_ms,
            p.max_delay_ms
        );
    }

    let mut reports = Vec::with_capacity(hosts.len());
    for host in &hosts {
        let stats = orchestrator.new_stats();
        let pb = progress_bar(stats.total(), "ports");
        let res = orchestrator
            .scan_target_with(host, Arc::clone(&stats), |s| update_bar(&pb, s))
            .await;
        pb.finish_and_clear();

        match res {
            Ok(report) => {
                println!("{}", stats.summary());
                output::write_results_table(&mut io::stdout().lock(), &report)?;
                reports.push(report);
            }
            Err(e) if hosts.len() > 1 => warn!(%host, error = %e, "skipping target"),
            Err(e) => return Err(e).with_context(|| format!("scan of {host} failed")),
        }
    }

    if let Some(path) = cli.output.as_deref() {
        let format = output::write_reports(path, &reports)?;
        println!("Wrote {format:?} results to {}", path.display());
    }
    Ok(())
}

async fn discover(cli: &Cli, config: &Config) -> Result<()> {
    let hosts: Vec<String> = match cli.target.as_deref() {
        Some(expr) => targets::parse_targets(expr)?,
        None => {
            let cidrs = targets::detect_local_cidrs()?;
            if cidrs.is_empty() {
                bail!("no local IPv4 network found; pass --target");
            }
            for cidr in &cidrs {
                println!("Sweeping local network {cidr}");
            }
            cidrs
                .into_iter()
                .flat_map(targets::expand_cidr_to_ips)
                .map(|ip| ip.to_string())
                .collect()
        }
    };

    let mut options = config.discovery_options();
    if let Some(c) = cli.concurrency {
        options.concurrency = c;
    }
    if let Some(ms) = cli.timeout_ms {
        options.timeout = Duration::from_millis(ms);
    }
    if options.concurrency == 0 {
        bail!("concurrency must be at least 1");
    }

    let sweep = DiscoverySweep::new(options);
    let stats = Arc::new(LiveStats::new(hosts.len() as u64));
    let pb = progress_bar(stats.total(), "hosts");
    let statuses = run_discovery(&sweep, &hosts, Arc::clone(&stats), |s| update_bar(&pb, s)).await;
    pb.finish_and_clear();

    output::write_discovery_table(&mut io::stdout().lock(), &statuses)?;
    if let Some(path) = cli.output.as_deref() {
        let format = output::write_hosts(path, &statuses)?;
        println!("Wrote {format:?} results to {}", path.display());
    }
    Ok(())
}
