use crate::config::types::{
    LogFormat, LogLevel, DEFAULT_GELF_HOST, DEFAULT_GELF_PORT, DEFAULT_KEY_PATH,
    DEFAULT_SERVER_ID, DEFAULT_SSH_PORT,
};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sshpot",
    version,
    about = "Low-interaction SSH honeypot that logs every credential attempt to Graylog"
)]
pub struct Cli {
    /// Path to the SSH host key (OpenSSH or PKCS#8 PEM)
    #[arg(short, long, default_value = DEFAULT_KEY_PATH, env = "SSHPOT_KEY")]
    pub key: PathBuf,

    /// SSH port to listen on
    #[arg(short, long, default_value_t = DEFAULT_SSH_PORT, env = "SSHPOT_PORT")]
    pub port: u16,

    /// Address to bind the listener to
    #[arg(long, default_value = "0.0.0.0", env = "SSHPOT_BIND")]
    pub bind: IpAddr,

    /// Graylog GELF UDP host
    #[arg(long, default_value = DEFAULT_GELF_HOST, env = "SSHPOT_GELF_HOST")]
    pub gelf_host: String,

    /// Graylog GELF UDP port
    #[arg(long, default_value_t = DEFAULT_GELF_PORT, env = "SSHPOT_GELF_PORT")]
    pub gelf_port: u16,

    /// SSH identification string presented to clients
    #[arg(long, default_value = DEFAULT_SERVER_ID, env = "SSHPOT_SERVER_ID")]
    pub server_id: String,

    /// How long a session may stay open waiting for a channel request (milliseconds)
    #[arg(long, default_value_t = 1000)]
    pub channel_wait_ms: u64,

    /// Console log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info, env = "SSHPOT_LOG_LEVEL")]
    pub log_level: LogLevel,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a new Ed25519 host key and exit
    GenerateKey {
        /// Output file path (refuses to overwrite an existing file)
        #[arg(short, long, default_value = DEFAULT_KEY_PATH)]
        output: PathBuf,
    },
}
