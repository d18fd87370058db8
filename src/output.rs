//! Console tables and report files (JSON, text, CSV, Markdown) for finished scans.
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::tls::CertificateInfo;
use crate::types::{HostStatus, ScanReport};

const BANNER_COL_MAX: usize = 60;

/// Render the open ports of one report as an aligned table.
pub fn write_results_table(out: &mut impl Write, report: &ScanReport) -> io::Result<()> {
    writeln!(
        out,
        "\nOpen ports on {} ({}): {} of {} scanned",
        report.target, report.ip, report.open_ports, report.total_ports
    )?;
    if report.results.is_empty() {
        return writeln!(out, "No open ports found.");
    }

    let port_w = "port".len().max(5);
    let state_w = "state".len();
    let mut service_w = "service".len();
    let mut banner_w = "banner".len();
    for r in &report.results {
        service_w = service_w.max(r.service.as_deref().map_or(1, str::len));
        banner_w = banner_w.max(r.banner.as_deref().map_or(1, |b| b.len().min(BANNER_COL_MAX)));
    }

    writeln!(
        out,
        "{:>port_w$}  {:<state_w$}  {:<service_w$}  {:<banner_w$}",
        "port", "state", "service", "banner",
    )?;
    writeln!(
        out,
        "{:-<port_w$}  {:-<state_w$}  {:-<service_w$}  {:-<banner_w$}",
        "", "", "", "",
    )?;
    for r in &report.results {
        let mut banner = r.banner.clone().unwrap_or_else(|| "-".into());
        if banner.len() > BANNER_COL_MAX {
            let cut = banner
                .char_indices()
                .nth(BANNER_COL_MAX)
                .map_or(banner.len(), |(i, _)| i);
            banner.truncate(cut);
        }
        writeln!(
            out,
            "{:>port_w$}  {:<state_w$}  {:<service_w$}  {:<banner_w$}",
            r.port,
            "open",
            r.service.as_deref().unwrap_or("-"),
            banner,
        )?;
    }
    for cert in &report.certificates {
        write_certificate(out, cert)?;
    }
    Ok(())
}

fn write_certificate(out: &mut impl Write, cert: &CertificateInfo) -> io::Result<()> {
    writeln!(out, "\nTLS certificate on port {}:", cert.port)?;
    writeln!(out, "  common name : {}", cert.common_name.as_deref().unwrap_or("-"))?;
    writeln!(out, "  issuer      : {}", cert.issuer.as_deref().unwrap_or("-"))?;
    writeln!(out, "  valid       : {} .. {}", cert.valid_from, cert.valid_to)?;
    if !cert.sans.is_empty() {
        writeln!(out, "  SAN         : {}", cert.sans.join(", "))?;
    }
    if cert.is_expired {
        writeln!(out, "  status      : EXPIRED")
    } else {
        writeln!(out, "  status      : valid, {} days left", cert.days_to_expiry)
    }
}

/// Render the live hosts of a sweep plus alive/down totals.
pub fn write_discovery_table(out: &mut impl Write, hosts: &[HostStatus]) -> io::Result<()> {
    let alive: Vec<&HostStatus> = hosts.iter().filter(|h| h.is_alive).collect();
    let ip_w = alive
        .iter()
        .map(|h| h.ip.len())
        .max()
        .unwrap_or(0)
        .max("ip".len());

    writeln!(out, "\n{:<ip_w$}  {:>8}  hostname", "ip", "rtt_ms")?;
    writeln!(out, "{:-<ip_w$}  {:-<8}  {:-<8}", "", "", "")?;
    for h in &alive {
        writeln!(
            out,
            "{:<ip_w$}  {:>8}  {}",
            h.ip,
            h.rtt.as_millis(),
            h.hostname.as_deref().unwrap_or("-"),
        )?;
    }
    writeln!(
        out,
        "\nHosts scanned: {}, alive: {}, down: {}",
        hosts.len(),
        alive.len(),
        hosts.len() - alive.len()
    )
}

/// Report file formats, picked from the output path's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
    Csv,
    Markdown,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("txt") => Ok(Self::Text),
            Some("csv") => Ok(Self::Csv),
            Some("md") => Ok(Self::Markdown),
            Some(other) => bail!("unsupported output format .{other} (use .json, .txt, .csv or .md)"),
            None => bail!(
                "cannot tell the format of {}: use a .json, .txt, .csv or .md extension",
                path.display()
            ),
        }
    }
}

/// Write port scan reports in the format named by `path`'s extension.
pub fn write_reports(path: &Path, reports: &[ScanReport]) -> Result<OutputFormat> {
    let format = OutputFormat::from_path(path)?;
    match format {
        OutputFormat::Json => write_json(path, reports)?,
        OutputFormat::Text => with_file(path, |out| {
            for report in reports {
                write_results_table(out, report)?;
            }
            Ok(())
        })?,
        OutputFormat::Csv => with_file(path, |out| write_reports_csv(out, reports))?,
        OutputFormat::Markdown => with_file(path, |out| write_reports_markdown(out, reports))?,
    }
    Ok(format)
}

/// Write discovery results in the format named by `path`'s extension.
pub fn write_hosts(path: &Path, hosts: &[HostStatus]) -> Result<OutputFormat> {
    let format = OutputFormat::from_path(path)?;
    match format {
        OutputFormat::Json => write_json(path, hosts)?,
        OutputFormat::Text => with_file(path, |out| Ok(write_discovery_table(out, hosts)?))?,
        OutputFormat::Csv => with_file(path, |out| write_hosts_csv(out, hosts))?,
        OutputFormat::Markdown => with_file(path, |out| write_hosts_markdown(out, hosts))?,
    }
    Ok(format)
}

fn with_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write(&mut out).with_context(|| format!("failed to write {}", path.display()))?;
    out.flush()
        .with_context(|| format!("failed to write {}", path.display()))
}

/// One row per open port: target, ip, port, state, service, banner, started_at.
pub fn write_reports_csv(out: &mut impl Write, reports: &[ScanReport]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["target", "ip", "port", "state", "service", "banner", "started_at"])?;
    for report in reports {
        for r in &report.results {
            let port = r.port.to_string();
            wtr.write_record([
                report.target.as_str(),
                report.ip.as_str(),
                port.as_str(),
                "open",
                r.service.as_deref().unwrap_or(""),
                r.banner.as_deref().unwrap_or(""),
                report.started_at.as_str(),
            ])?;
        }
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_hosts_csv(out: &mut impl Write, hosts: &[HostStatus]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["ip", "is_alive", "rtt_ms", "hostname"])?;
    for h in hosts {
        let rtt = h.rtt.as_millis().to_string();
        wtr.write_record([
            h.ip.as_str(),
            if h.is_alive { "true" } else { "false" },
            rtt.as_str(),
            h.hostname.as_deref().unwrap_or(""),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn md_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

pub fn write_reports_markdown(out: &mut impl Write, reports: &[ScanReport]) -> Result<()> {
    for report in reports {
        writeln!(out, "# Port scan: {} ({})\n", report.target, report.ip)?;
        writeln!(out, "- Started: {}", report.started_at)?;
        writeln!(out, "- Ports scanned: {}", report.total_ports)?;
        writeln!(out, "- Open ports: {}", report.open_ports)?;
        writeln!(out, "- Duration: {} ms\n", report.elapsed_ms)?;

        if report.results.is_empty() {
            writeln!(out, "_No open ports found._\n")?;
        } else {
            writeln!(out, "| Port | State | Service | Banner |")?;
            writeln!(out, "|------|-------|---------|--------|")?;
            for r in &report.results {
                writeln!(
                    out,
                    "| {} | open | {} | {} |",
                    r.port,
                    md_cell(r.service.as_deref().unwrap_or("-")),
                    md_cell(r.banner.as_deref().unwrap_or("-")),
                )?;
            }
            writeln!(out)?;
        }

        if !report.certificates.is_empty() {
            writeln!(out, "## TLS certificates\n")?;
            for c in &report.certificates {
                writeln!(
                    out,
                    "- port {}: CN `{}`, issuer `{}`, valid {} to {}{}",
                    c.port,
                    c.common_name.as_deref().unwrap_or("-"),
                    c.issuer.as_deref().unwrap_or("-"),
                    c.valid_from,
                    c.valid_to,
                    if c.is_expired { " (expired)" } else { "" },
                )?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

pub fn write_hosts_markdown(out: &mut impl Write, hosts: &[HostStatus]) -> Result<()> {
    let alive = hosts.iter().filter(|h| h.is_alive).count();
    writeln!(out, "# Host discovery\n")?;
    writeln!(
        out,
        "- Hosts scanned: {}, alive: {}, down: {}\n",
        hosts.len(),
        alive,
        hosts.len() - alive
    )?;
    writeln!(out, "| IP | State | RTT (ms) | Hostname |")?;
    writeln!(out, "|----|-------|----------|----------|")?;
    for h in hosts {
        writeln!(
            out,
            "| {} | {} | {} | {} |",
            h.ip,
            if h.is_alive { "up" } else { "down" },
            h.rtt.as_millis(),
            md_cell(h.hostname.as_deref().unwrap_or("-")),
        )?;
    }
    Ok(())
}

/// Write any serializable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("failed to write JSON to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeResult;
    use std::time::Duration;

    fn report(results: Vec<ProbeResult>) -> ScanReport {
        ScanReport {
            target: "db.lan".into(),
            ip: "10.0.0.5".into(),
            total_ports: 100,
            open_ports: results.len() as u64,
            elapsed_ms: 12,
            started_at: "2026-01-01T00:00:00Z".into(),
            results,
            certificates: Vec::new(),
        }
    }

    #[test]
    fn table_lists_open_ports() {
        let mut ssh = ProbeResult::open(22);
        ssh.service = Some("SSH".into());
        ssh.banner = Some("SSH-2.0-OpenSSH_9.6".into());
        let mut buf = Vec::new();
        write_results_table(&mut buf, &report(vec![ssh, ProbeResult::open(5432)])).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("2 of 100 scanned"));
        assert!(text.contains("SSH-2.0-OpenSSH_9.6"));
        let rows: Vec<&str> = text.lines().filter(|l| l.contains("open")).collect();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn empty_report_says_so() {
        let mut buf = Vec::new();
        write_results_table(&mut buf, &report(vec![])).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("No open ports found."));
    }

    #[test]
    fn discovery_table_counts() {
        let mut up = HostStatus::down("10.0.0.2");
        up.is_alive = true;
        up.rtt = Duration::from_millis(3);
        let hosts = vec![HostStatus::down("10.0.0.1"), up];
        let mut buf = Vec::new();
        write_discovery_table(&mut buf, &hosts).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("10.0.0.2"));
        assert!(!text.contains("10.0.0.1 "));
        assert!(text.contains("alive: 1, down: 1"));
    }

    #[test]
    fn format_follows_the_extension() {
        assert_eq!(OutputFormat::from_path(Path::new("a.json")).unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_path(Path::new("a.TXT")).unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::from_path(Path::new("a.csv")).unwrap(), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_path(Path::new("a.md")).unwrap(), OutputFormat::Markdown);
        assert!(OutputFormat::from_path(Path::new("report.html")).is_err());
        assert!(OutputFormat::from_path(Path::new("report")).is_err());
    }

    #[test]
    fn csv_path_gets_csv_not_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let mut http = ProbeResult::open(80);
        http.service = Some("HTTP".into());
        http.banner = Some("HTTP/1.1 200 OK, fine".into());

        let format = write_reports(&path, &[report(vec![ProbeResult::open(22), http])]).unwrap();
        assert_eq!(format, OutputFormat::Csv);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "target,ip,port,state,service,banner,started_at");
        assert_eq!(lines[1], "db.lan,10.0.0.5,22,open,,,2026-01-01T00:00:00Z");
        assert_eq!(
            lines[2],
            "db.lan,10.0.0.5,80,open,HTTP,\"HTTP/1.1 200 OK, fine\",2026-01-01T00:00:00Z"
        );
    }

    #[test]
    fn markdown_table_escapes_pipes() {
        let mut r = ProbeResult::open(8080);
        r.banner = Some("a|b".into());
        let mut buf = Vec::new();
        write_reports_markdown(&mut buf, &[report(vec![r])]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("# Port scan: db.lan (10.0.0.5)"));
        assert!(text.contains("| 8080 | open | - | a\\|b |"), "{text}");
    }

    #[test]
    fn text_and_host_formats() {
        let dir = tempfile::tempdir().unwrap();
        let txt = dir.path().join("out.txt");
        write_reports(&txt, &[report(vec![])]).unwrap();
        assert!(std::fs::read_to_string(&txt)
            .unwrap()
            .contains("No open ports found."));

        let mut up = HostStatus::down("10.0.0.2");
        up.is_alive = true;
        up.rtt = Duration::from_millis(4);
        let hosts = [HostStatus::down("10.0.0.1"), up];
        let csv_path = dir.path().join("hosts.csv");
        write_hosts(&csv_path, &hosts).unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(text.contains("10.0.0.2,true,4,"), "{text}");

        let md_path = dir.path().join("hosts.md");
        write_hosts(&md_path, &hosts).unwrap();
        let text = std::fs::read_to_string(&md_path).unwrap();
        assert!(text.contains("alive: 1, down: 1"));
        assert!(text.contains("| 10.0.0.1 | down | 0 | - |"));
    }

    #[test]
    fn json_written_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &[report(vec![ProbeResult::open(80)])]).unwrap();
        let back: Vec<ScanReport> =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(back[0].results, vec![ProbeResult::open(80)]);
    }
}
