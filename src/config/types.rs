use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_KEY_PATH: &str = "/opt/honeypot/server.key";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_GELF_HOST: &str = "localhost";
pub const DEFAULT_GELF_PORT: u16 = 12201;
/// Version banner of a stock Ubuntu 22.04 sshd, so scanners see a common target.
pub const DEFAULT_SERVER_ID: &str = "SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.6";
/// GELF chunk size suitable for WAN links (matches common GELF client defaults).
pub const DEFAULT_GELF_CHUNK_SIZE: usize = 1420;

/// Log level enum (replaces stringly-typed field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Complete honeypot configuration. Immutable once the server starts; shared behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct HoneypotConfig {
    pub server: ServerConfig,
    pub gelf: GelfConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host_key_path: PathBuf,
    pub bind_address: IpAddr,
    pub port: u16,
    /// SSH identification string sent before key exchange
    pub server_id: String,
    /// Upper bound on a single `accept` wait; the shutdown signal is checked between waits
    pub accept_poll_interval: Duration,
    /// How long an established session may go without requesting a channel
    pub channel_wait: Duration,
    /// Upper bound on the identification exchange before the session is considered started
    pub handshake_timeout: Duration,
    /// Delay russh inserts before each authentication rejection
    pub auth_rejection_time: Duration,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_key_path: PathBuf::from(DEFAULT_KEY_PATH),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_SSH_PORT,
            server_id: DEFAULT_SERVER_ID.to_string(),
            accept_poll_interval: default_accept_poll_interval(),
            channel_wait: default_channel_wait(),
            handshake_timeout: default_handshake_timeout(),
            auth_rejection_time: default_auth_rejection_time(),
        }
    }
}

fn default_accept_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_channel_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_auth_rejection_time() -> Duration {
    Duration::from_millis(100)
}

/// Destination of structured capture records
#[derive(Debug, Clone)]
pub struct GelfConfig {
    pub host: String,
    pub port: u16,
    /// Maximum UDP datagram payload before a record is split into GELF chunks
    pub chunk_size: usize,
    /// Value of the GELF `host` field; defaults to the machine hostname
    pub source_host: Option<String>,
}

impl GelfConfig {
    /// `host:port` string suitable for `UdpSocket::send_to` resolution.
    pub fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GelfConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_GELF_HOST.to_string(),
            port: DEFAULT_GELF_PORT,
            chunk_size: DEFAULT_GELF_CHUNK_SIZE,
            source_host: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
        }
    }
}
