//! Configuration of the zone-transfer coordinator.

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use domain::base::Name;
use serde::{Deserialize, Serialize};

/// The top-level configuration file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Where the persisted per-zone SOA state is kept between runs.
    #[serde(default = "default_state_file")]
    pub state_file: Utf8PathBuf,

    /// The zones this coordinator is a secondary for.
    pub zones: Vec<ZoneConfig>,

    /// Bounds on the pool of concurrent TCP transfers.
    #[serde(default)]
    pub tcp: TcpConfig,

    /// How to reach the authoritative server that owns this coordinator.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Where diff-log records are appended.
    #[serde(default = "default_diff_log")]
    pub diff_log: Utf8PathBuf,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_state_file() -> Utf8PathBuf {
    Utf8PathBuf::from("nsd.xfst")
}

fn default_diff_log() -> Utf8PathBuf {
    Utf8PathBuf::from("ixfr.db")
}

impl Config {
    /// Load and parse a configuration file.
    pub fn load(path: &camino::Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        toml::from_str(&text).map_err(ConfigError::Parse)
    }
}

/// A zone this coordinator is responsible for keeping current.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ZoneConfig {
    /// The zone's apex name.
    pub name: Name<bytes::Bytes>,

    /// The primaries to poll, tried in order and rotated on failure.
    pub masters: Vec<SocketAddr>,

    /// The SOA the authoritative server already has loaded for this zone,
    /// if any, communicated out-of-band at startup. When present, both
    /// `soa_nsd` and `soa_disk` are seeded from it with `acquired = now`;
    /// the zone still enters REFRESHING immediately, since data this old
    /// may itself be stale.
    #[serde(default)]
    pub initial_soa: Option<InitialSoaConfig>,
}

/// The SOA snapshot an already-loaded zone starts from, as given in
/// configuration rather than learned from a master.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InitialSoaConfig {
    pub primary_ns: Name<bytes::Bytes>,
    pub responsible_email: Name<bytes::Bytes>,
    #[serde(default = "default_initial_soa_ttl")]
    pub ttl: u32,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

fn default_initial_soa_ttl() -> u32 {
    3600
}

impl InitialSoaConfig {
    /// Build the [`crate::soa::SoaSnapshot`] this configuration describes.
    pub fn to_snapshot(&self) -> crate::soa::SoaSnapshot {
        use domain::base::iana::{Class, Rtype};
        use domain::base::Serial;

        let rdata_count =
            (self.primary_ns.as_slice().len() + self.responsible_email.as_slice().len() + 20) as u16;

        crate::soa::SoaSnapshot {
            rtype: Rtype::SOA,
            class: Class::IN,
            ttl: self.ttl,
            rdata_count,
            primary_ns: self.primary_ns.clone(),
            responsible_email: self.responsible_email.clone(),
            serial: Serial(self.serial),
            refresh: self.refresh,
            retry: self.retry,
            expire: self.expire,
            minimum: self.minimum,
        }
    }
}

/// Limits on the TCP transfer pool.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TcpConfig {
    /// The maximum number of concurrent TCP transfers.
    #[serde(default = "default_max_tcp")]
    pub max_connections: usize,

    /// How long a connect/read/write phase may take before it is abandoned.
    #[serde(
        default = "default_tcp_timeout",
        serialize_with = "crate::util::serialize_duration_as_secs",
        deserialize_with = "crate::util::deserialize_duration_from_secs"
    )]
    pub timeout: std::time::Duration,
}

fn default_max_tcp() -> usize {
    8
}

fn default_tcp_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(120)
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_tcp(),
            timeout: default_tcp_timeout(),
        }
    }
}

/// How the coordinator exchanges control messages with its parent process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub enum IpcConfig {
    /// No parent process is attached; useful for standalone testing.
    #[default]
    Disabled,

    /// A named pipe shared with the parent process.
    Pipe { path: Utf8PathBuf },
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LoggingConfig {
    /// The minimum level to emit.
    #[serde(default)]
    pub level: LogLevel,

    /// Where log lines are sent.
    #[serde(default)]
    pub target: LogTarget,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            target: LogTarget::default(),
        }
    }
}

/// A logging verbosity level.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(value: LogLevel) -> Self {
        use tracing_subscriber::filter::LevelFilter;
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Where log output is written.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogTarget {
    #[default]
    Stdout,
    Stderr,
    File {
        path: Utf8PathBuf,
    },
}

/// An error encountered while loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "could not read configuration file: {err}"),
            ConfigError::Parse(err) => write!(f, "could not parse configuration file: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let text = r#"
            [[zones]]
            name = "example.com."
            masters = ["192.0.2.1:53"]
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.tcp.max_connections, 8);
        assert_eq!(config.state_file, Utf8PathBuf::from("nsd.xfst"));
        assert!(config.zones[0].initial_soa.is_none());
    }

    #[test]
    fn parse_initial_soa() {
        let text = r#"
            [[zones]]
            name = "example.com."
            masters = ["192.0.2.1:53"]

            [zones.initial-soa]
            primary-ns = "ns1.example.com."
            responsible-email = "hostmaster.example.com."
            serial = 2024010100
            refresh = 3600
            retry = 900
            expire = 1209600
            minimum = 300
        "#;
        let config: Config = toml::from_str(text).unwrap();
        let initial = config.zones[0].initial_soa.as_ref().unwrap();
        assert_eq!(initial.serial, 2024010100);
        let snapshot = initial.to_snapshot();
        assert_eq!(snapshot.serial, domain::base::Serial(2024010100));
        assert_eq!(snapshot.ttl, 3600);
    }
}
