//! server configuration loaded from a yaml file.

use std::{
    fmt, fs, io,
    net::SocketAddrV4,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::warn;

/// Upper bound on configured routes; extra entries are dropped at load.
pub const MAX_ROUTES: usize = 16;

/// Top level configuration. Immutable after load and shared read-only by
/// every worker.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    pub ssl: SslSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Legacy key, superseded by `logging.level`.
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SslSection {
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Route {
    pub path: String,
    pub technology: Technology,
    #[serde(default)]
    pub document_root: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Technology {
    Static,
    ReverseProxy,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
    /// Lines buffered between callers and the writer thread.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Rotate the log file once it reaches this many bytes. 0 disables.
    #[serde(default)]
    pub rollover_size: u64,
    #[serde(default)]
    pub rollover_daily: bool,
    #[serde(default = "default_appenders")]
    pub appender_flags: Vec<Appender>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: LogLevel::default(),
            format: LogFormat::default(),
            buffer_size: default_buffer_size(),
            rollover_size: 0,
            rollover_daily: false,
            appender_flags: default_appenders(),
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Appender {
    File,
    Console,
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    1024
}

fn default_appenders() -> Vec<Appender> {
    vec![Appender::Console]
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        if config.routes.len() > MAX_ROUTES {
            warn!(
                "{} routes configured, keeping the first {MAX_ROUTES}",
                config.routes.len()
            );
            config.routes.truncate(MAX_ROUTES);
        }
        Ok(config)
    }
}

/// Parses a backend address of the form `IPv4:PORT`. The configured text is
/// kept as written and parsed on every route match.
pub(crate) fn parse_backend(backend: &str) -> Option<SocketAddrV4> {
    let (ip, port) = backend.split_once(':')?;
    Some(SocketAddrV4::new(ip.parse().ok()?, port.parse().ok()?))
}

pub enum ConfigError {
    Io(io::Error),
    Parse(serde_yaml::Error),
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "unable to read configuration: {e}"),
            Self::Parse(e) => write!(f, "unable to parse configuration: {e}"),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Parse(e)
    }
}
