//! On-disk configuration (`sr.toml`).
//!
//! ```toml
//! [relay]
//! capacity = 1024          # ring size in bytes, power of two
//! tick_interval_ms = 10
//! upstream_retry_ms = 1000 # reopen a lost upstream; 0 exits instead
//!
//! [server]
//! bind = "0.0.0.0"
//! port = 6638
//!
//! [upstream]
//! kind = "device"          # or "tcp" with `address = "host:port"`
//! path = "/dev/ttyUSB0"
//!
//! [telemetry]
//! status_socket = "/tmp/sr-status.sock"
//!
//! [log]
//! hex_dump = false
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;

use sr_io::upstream::{DeviceUpstream, TcpUpstream, Upstream};

#[derive(Deserialize, Default, Clone, Debug)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RelayConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_upstream_retry")]
    pub upstream_retry_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            tick_interval_ms: default_tick_interval(),
            upstream_retry_ms: default_upstream_retry(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamConfig {
    Device { path: PathBuf },
    Tcp { address: String },
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::Device {
            path: PathBuf::from("/dev/ttyUSB0"),
        }
    }
}

impl fmt::Display for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device { path } => write!(f, "device {}", path.display()),
            Self::Tcp { address } => write!(f, "tcp {}", address),
        }
    }
}

impl UpstreamConfig {
    pub fn open(&self) -> anyhow::Result<Box<dyn Upstream>> {
        Ok(match self {
            Self::Device { path } => Box::new(
                DeviceUpstream::open(path)
                    .with_context(|| format!("opening upstream device {}", path.display()))?,
            ),
            Self::Tcp { address } => Box::new(
                TcpUpstream::connect(address.as_str())
                    .with_context(|| format!("connecting to upstream {}", address))?,
            ),
        })
    }
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub status_socket: Option<PathBuf>,
}

#[derive(Deserialize, Default, Clone, Debug)]
pub struct LogConfig {
    #[serde(default)]
    pub hex_dump: bool,
}

fn default_capacity() -> usize {
    128
}
fn default_tick_interval() -> u64 {
    10
}
fn default_upstream_retry() -> u64 {
    1000
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    6638
}

impl Config {
    /// Read `path`, or fall back to defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Checks the ring itself cannot make. Capacity is validated by the ring.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relay.tick_interval_ms == 0 {
            bail!("[relay] tick_interval_ms must be at least 1");
        }
        Ok(())
    }
}
