pub mod types;

use crate::cli::Cli;
use anyhow::Result;
use std::time::Duration;
use types::{GelfConfig, HoneypotConfig, LoggingConfig, ServerConfig};

/// Largest GELF chunk that still fits a UDP datagram after the 12-byte chunk header.
pub const MAX_GELF_CHUNK_SIZE: usize = 65_000;
/// Smallest useful GELF chunk: header plus a handful of payload bytes.
pub const MIN_GELF_CHUNK_SIZE: usize = 64;

/// Build the runtime configuration from parsed command-line arguments and validate it.
pub fn from_cli(cli: &Cli) -> Result<HoneypotConfig> {
    let defaults = ServerConfig::default();
    let config = HoneypotConfig {
        server: ServerConfig {
            host_key_path: cli.key.clone(),
            bind_address: cli.bind,
            port: cli.port,
            server_id: cli.server_id.clone(),
            channel_wait: Duration::from_millis(cli.channel_wait_ms),
            ..defaults
        },
        gelf: GelfConfig {
            host: cli.gelf_host.clone(),
            port: cli.gelf_port,
            ..GelfConfig::default()
        },
        logging: LoggingConfig {
            level: cli.log_level,
            format: cli.log_format,
        },
    };
    validate_config(&config)?;
    Ok(config)
}

/// Validate an already-constructed config (e.g. built by hand in tests).
pub fn validate_config(config: &HoneypotConfig) -> Result<()> {
    validate_server(&config.server)?;
    validate_gelf(&config.gelf)?;
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<()> {
    if !server.server_id.starts_with("SSH-2.0-") {
        anyhow::bail!(
            "server_id must start with 'SSH-2.0-' (got '{}')",
            server.server_id
        );
    }
    if server.server_id.contains(['\r', '\n']) {
        anyhow::bail!("server_id must be a single line");
    }
    if server.accept_poll_interval.is_zero() {
        anyhow::bail!("accept_poll_interval must be > 0");
    }
    if server.channel_wait.is_zero() {
        anyhow::bail!("channel_wait must be > 0");
    }
    if server.handshake_timeout.is_zero() {
        anyhow::bail!("handshake_timeout must be > 0");
    }
    Ok(())
}

fn validate_gelf(gelf: &GelfConfig) -> Result<()> {
    if gelf.host.trim().is_empty() {
        anyhow::bail!("gelf host must not be empty");
    }
    if gelf.port == 0 {
        anyhow::bail!("gelf port must be > 0");
    }
    if !(MIN_GELF_CHUNK_SIZE..=MAX_GELF_CHUNK_SIZE).contains(&gelf.chunk_size) {
        anyhow::bail!(
            "gelf chunk_size must be between {} and {} (got {})",
            MIN_GELF_CHUNK_SIZE,
            MAX_GELF_CHUNK_SIZE,
            gelf.chunk_size
        );
    }
    Ok(())
}
