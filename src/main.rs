use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use sshpot::cli::{Cli, Command};
use sshpot::config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::GenerateKey { output }) = &cli.command {
        sshpot::ssh::keys::write_new_host_key(output)?;
        eprintln!("Host key written to {}", output.display());
        return Ok(());
    }

    let app_config = match config::from_cli(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    sshpot::logging::setup_logging(
        &app_config.logging.level.to_string(),
        app_config.logging.format,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %app_config.server.listen_addr(),
        "Starting sshpot"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if let Err(e) = sshpot::server::run(app_config).await {
            error!(error = %e, "Server error");
            eprintln!("ERROR: {:#}", e);
            std::process::exit(1);
        }
    });

    Ok(())
}
