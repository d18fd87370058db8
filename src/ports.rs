use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Most commonly exposed TCP ports, in rough order of prevalence.
pub const TOP_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 443, 445, 993, 995, 1723, 3306, 3389, 5432,
    5900, 6379, 8080, 8443, 27017,
];

/// Ports of the `quick` profile: the usual remote-access, mail, web and database services.
pub const QUICK_PORTS: &[u16] = &[
    21, 22, 23, 25, 80, 110, 143, 443, 445, 993, 995, 1433, 3306, 3389, 5432, 5900, 8080, 8443,
    27017,
];

/// A wider list of one hundred common ports.
pub const TOP_100_PORTS: &[u16] = &[
    7, 9, 13, 21, 22, 23, 25, 26, 37, 53, 79, 80, 81, 82, 83, 84, 85, 88, 89, 90, 99, 100, 106,
    110, 111, 113, 119, 125, 135, 139, 143, 144, 146, 161, 163, 179, 199, 211, 212, 222, 254, 255,
    256, 259, 264, 280, 301, 306, 311, 340, 366, 389, 406, 407, 416, 417, 425, 427, 443, 444, 445,
    458, 464, 465, 481, 497, 500, 512, 513, 514, 515, 524, 541, 543, 544, 545, 548, 554, 555, 563,
    587, 593, 616, 617, 625, 631, 636, 646, 648, 666, 667, 668, 683, 687, 691, 700, 705, 711, 714,
    720,
];

/// Parse a ports file content into a deduplicated list of TCP ports (1..=65535).
///
/// Supported formats per line:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }
        push_item(line, &mut out, &mut seen).with_context(|| format!("line {line_no}"))?;
    }

    Ok(out)
}

/// Parse a command-line port specification such as `1-1000,80,443`.
///
/// Same rules as the ports file, with `,` separating items instead of newlines.
pub fn parse_port_spec(spec: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for item in spec.split(',').map(str::trim) {
        if item.is_empty() {
            continue;
        }
        push_item(item, &mut out, &mut seen)?;
    }

    if out.is_empty() {
        bail!("empty port specification: {spec:?}");
    }
    Ok(out)
}

/// Load a ports list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Load a ports list from a file, or return the default list if missing or empty.
pub fn load_ports_or_default(path: impl AsRef<Path>) -> Vec<u16> {
    match load_ports_from_path(&path) {
        Ok(v) if !v.is_empty() => v,
        _ => default_ports(),
    }
}

/// Ports scanned when nothing else was asked for: the privileged range 1-1024.
pub fn default_ports() -> Vec<u16> {
    (1..=1024).collect()
}

/// Every TCP port.
pub fn full_range() -> Vec<u16> {
    (1..=u16::MAX).collect()
}

/// The `n` most common ports.
///
/// Up to the length of [`TOP_PORTS`] a prefix of it is used, up to 100 a prefix of
/// [`TOP_100_PORTS`], and beyond that simply `1..=n`.
pub fn top_ports(n: usize) -> Vec<u16> {
    if n <= TOP_PORTS.len() {
        TOP_PORTS[..n].to_vec()
    } else if n <= TOP_100_PORTS.len() {
        TOP_100_PORTS[..n].to_vec()
    } else {
        let upper = n.min(u16::MAX as usize) as u16;
        (1..=upper).collect()
    }
}

fn push_item(item: &str, out: &mut Vec<u16>, seen: &mut HashSet<u16>) -> Result<()> {
    if let Some((a, b)) = item.split_once('-') {
        let start =
            parse_port_str(a.trim()).with_context(|| format!("invalid start in range: {a}"))?;
        let end = parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        for p in start..=end {
            if seen.insert(p) {
                out.push(p);
            }
        }
        return Ok(());
    }

    let p = parse_port_str(item).with_context(|| format!("invalid port value: {item}"))?;
    if seen.insert(p) {
        out.push(p);
    }
    Ok(())
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
