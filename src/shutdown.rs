use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Process-wide stop request, shared by the signal listener and the listener loop.
///
/// Triggering only sets the signal; it never closes sockets or interrupts
/// in-flight sessions.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Returns `true` only for the first trigger.
    pub fn trigger(&self, source: &str) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.token.cancel();
        info!(source = %source, "Shutdown requested");
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Spawn the OS signal listener. Each SIGINT/SIGTERM triggers `signal` and prints a notice.
pub fn spawn_signal_listener(signal: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        handle_signals(signal).await;
    })
}

#[cfg(unix)]
async fn handle_signals(shutdown: ShutdownSignal) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGINT handler");
            return;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigint.recv() => notify(&shutdown, "SIGINT"),
            _ = sigterm.recv() => notify(&shutdown, "SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
async fn handle_signals(shutdown: ShutdownSignal) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        notify(&shutdown, "Ctrl-C");
    }
}

fn notify(shutdown: &ShutdownSignal, name: &str) {
    if shutdown.trigger(name) {
        println!("\n{} received, shutting down (in-flight sessions finish on their own)", name);
    } else {
        println!("\n{} received again, shutdown already in progress", name);
    }
}
