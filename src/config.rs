//! Scanner configuration: built-in defaults, optionally overridden by a TOML file.
//!
//! Lookup order for the file:
//! 1) an explicit path (`--config`),
//! 2) `$PORTPROBE_CONFIG`,
//! 3) `./.portprobe.toml`,
//! 4) `~/.portprobe.toml`,
//! 5) defaults if none exists.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::{DiscoveryOptions, DISCOVERY_PORTS};
use crate::engine::ProbeOptions;
use crate::pacing::PacingConfig;
use crate::ports::{self, QUICK_PORTS, TOP_100_PORTS};

pub const CONFIG_ENV: &str = "PORTPROBE_CONFIG";
pub const CONFIG_FILE_NAME: &str = ".portprobe.toml";

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub defaults: Defaults,
    pub stealth: StealthSettings,
    pub discovery: DiscoverySettings,
    pub profiles: BTreeMap<String, Profile>,
}

/// Settings used when no profile or flag says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub service_detection: bool,
    pub banner_grab: bool,
}

/// Slow, shuffled scanning. Replaces concurrency and timeout when stealth is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StealthSettings {
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub randomize_order: bool,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub ports: Vec<u16>,
    pub concurrency: usize,
    pub timeout_ms: u64,
    pub resolve_names: bool,
}

/// A named scan preset. `ports` uses the command-line syntax, e.g. `"1-1024,8080"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub ports: String,
    pub concurrency: usize,
    pub timeout_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            concurrency: 100,
            timeout_ms: 1000,
            service_detection: false,
            banner_grab: false,
        }
    }
}

impl Default for StealthSettings {
    fn default() -> Self {
        let pacing = PacingConfig::default();
        Self {
            concurrency: 10,
            timeout_ms: 2000,
            randomize_order: pacing.randomize_order,
            min_delay_ms: pacing.min_delay_ms,
            max_delay_ms: pacing.max_delay_ms,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            ports: DISCOVERY_PORTS.to_vec(),
            concurrency: 100,
            timeout_ms: 1000,
            resolve_names: true,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            ports: "1-1024".into(),
            concurrency: 100,
            timeout_ms: 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            defaults: Defaults::default(),
            stealth: StealthSettings::default(),
            discovery: DiscoverySettings::default(),
            profiles: builtin_profiles(),
        }
    }
}

fn join_ports(list: &[u16]) -> String {
    list.iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `quick`, `normal` and `aggressive`.
pub fn builtin_profiles() -> BTreeMap<String, Profile> {
    BTreeMap::from([
        (
            "quick".to_string(),
            Profile {
                ports: join_ports(QUICK_PORTS),
                concurrency: 200,
                timeout_ms: 500,
            },
        ),
        (
            "normal".to_string(),
            Profile {
                ports: join_ports(TOP_100_PORTS),
                concurrency: 100,
                timeout_ms: 1000,
            },
        ),
        (
            "aggressive".to_string(),
            Profile {
                ports: "1-65535".into(),
                concurrency: 500,
                timeout_ms: 200,
            },
        ),
    ])
}

impl Profile {
    pub fn port_list(&self) -> Result<Vec<u16>> {
        ports::parse_port_spec(&self.ports)
    }
}

impl Config {
    /// Resolve and load the configuration file, see the module docs for the order.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            return Ok((config, ConfigSource::File(path.to_path_buf())));
        }

        if let Ok(path_str) = env::var(CONFIG_ENV) {
            if !path_str.trim().is_empty() {
                let path = PathBuf::from(path_str);
                let config = Self::load_from_file(&path)?;
                return Ok((config, ConfigSource::EnvPath(path)));
            }
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        Self::parse_toml(&contents)
            .map_err(|err| anyhow!("invalid config {}: {err:#}", path.display()))
    }

    /// Parse TOML; built-in profiles the file does not mention stay available.
    pub fn parse_toml(contents: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        for (name, profile) in builtin_profiles() {
            config.profiles.entry(name).or_insert(profile);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the default configuration to `path`, refusing to overwrite.
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(anyhow!("{} already exists", path.display()));
        }
        fs::write(path, Self::default().to_toml_string()?)
            .with_context(|| format!("failed to write config to {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("defaults.concurrency", self.defaults.concurrency),
            ("stealth.concurrency", self.stealth.concurrency),
            ("discovery.concurrency", self.discovery.concurrency),
        ];
        for (key, value) in counts {
            if value == 0 {
                return Err(anyhow!("{key} must be at least 1"));
            }
        }
        if self.discovery.ports.is_empty() {
            return Err(anyhow!("discovery.ports must list at least one port"));
        }
        if self.discovery.ports.contains(&0) {
            return Err(anyhow!("discovery.ports must not contain port 0"));
        }
        self.pacing(true).validate()?;
        for (name, profile) in &self.profiles {
            if profile.concurrency == 0 {
                return Err(anyhow!("profiles.{name}.concurrency must be at least 1"));
            }
            profile
                .port_list()
                .with_context(|| format!("profiles.{name}.ports"))?;
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Engine options from `[defaults]`.
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(self.defaults.timeout_ms),
            concurrency: self.defaults.concurrency,
            service_detection: self.defaults.service_detection,
            banner_grab: self.defaults.banner_grab,
            ..ProbeOptions::default()
        }
    }

    pub fn pacing(&self, enabled: bool) -> PacingConfig {
        PacingConfig {
            enabled,
            randomize_order: self.stealth.randomize_order,
            min_delay_ms: self.stealth.min_delay_ms,
            max_delay_ms: self.stealth.max_delay_ms,
        }
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            ports: self.discovery.ports.clone(),
            timeout: Duration::from_millis(self.discovery.timeout_ms),
            concurrency: self.discovery.concurrency,
            resolve_names: self.discovery.resolve_names,
            ..DiscoveryOptions::default()
        }
    }

    fn find_default_file() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}
