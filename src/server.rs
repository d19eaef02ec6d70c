use crate::config::types::HoneypotConfig;
use crate::emitter::EventEmitter;
use crate::shutdown::{self, ShutdownSignal};
use crate::ssh::keys;
use crate::ssh::supervisor;
use crate::ssh::transport::{build_russh_config, RusshTransport, Transport};
use crate::utils::generate_correlation_id;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, info, info_span, warn, Instrument};

const LISTEN_BACKLOG: u32 = 100;
/// First pause after a failed accept; doubles per consecutive failure up to the poll interval.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// How long to wait for queued events to reach the collector before exiting.
const EMITTER_DRAIN: Duration = Duration::from_millis(500);

/// Settings for a running listener loop.
#[derive(Debug, Clone, Copy)]
pub struct ServeSettings {
    pub accept_poll_interval: Duration,
    pub channel_wait: Duration,
}

/// Counters returned when the listener loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub accepted: u64,
}

/// Main server orchestrator. Returns once shutdown completes; errors are fatal startup failures.
pub async fn run(config: HoneypotConfig) -> Result<()> {
    let config = Arc::new(config);

    // Load the key before binding: a missing key must never leave a socket behind
    let host_key = keys::load_host_key(&config.server.host_key_path)?;
    info!(path = %config.server.host_key_path.display(), "Host key loaded");

    let transport = Arc::new(RusshTransport::new(
        build_russh_config(host_key, &config.server),
        config.server.handshake_timeout,
    ));
    let emitter = Arc::new(EventEmitter::new(&config.gelf));

    let listener = Listener::bind(config.server.listen_addr()).await?;
    info!(
        addr = %listener.local_addr(),
        gelf = %config.gelf.destination(),
        server_id = %config.server.server_id,
        "SSH honeypot listening"
    );

    let shutdown = ShutdownSignal::new();
    shutdown::spawn_signal_listener(shutdown.clone());

    let stats = listener
        .serve(
            transport,
            emitter.clone(),
            shutdown,
            ServeSettings {
                accept_poll_interval: config.server.accept_poll_interval,
                channel_wait: config.server.channel_wait,
            },
        )
        .await;

    let unsent = emitter.flush(EMITTER_DRAIN).await;
    if unsent > 0 {
        warn!(unsent, "Exiting with events still queued for the collector");
    }
    info!(
        accepted = stats.accepted,
        dropped_events = emitter.dropped_count(),
        "Honeypot stopped"
    );
    Ok(())
}

/// The listening socket plus the accept loop.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind with `SO_REUSEADDR` so a restart does not wait out TIME_WAIT.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("creating listening socket")?;
        socket
            .set_reuseaddr(true)
            .context("setting SO_REUSEADDR")?;
        socket
            .bind(addr)
            .with_context(|| format!("binding {}", addr))?;
        let inner = socket
            .listen(LISTEN_BACKLOG)
            .with_context(|| format!("listening on {}", addr))?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    }

    /// Accept connections until `shutdown` is triggered.
    ///
    /// Each accepted socket is handed to its own supervisor task. The signal is
    /// checked before every accept, and each accept waits at most one poll
    /// interval, so a shutdown is observed within one interval. Supervisors
    /// already running are left to finish on their own.
    pub async fn serve<T: Transport>(
        self,
        transport: Arc<T>,
        emitter: Arc<EventEmitter>,
        shutdown: ShutdownSignal,
        settings: ServeSettings,
    ) -> ListenerStats {
        let mut stats = ListenerStats::default();
        let mut accept_failures: u32 = 0;

        loop {
            if shutdown.is_triggered() {
                info!("Shutdown signal set, no longer accepting connections");
                break;
            }

            let accepted =
                match tokio::time::timeout(settings.accept_poll_interval, self.inner.accept())
                    .await
                {
                    Err(_elapsed) => continue,
                    Ok(result) => result,
                };

            match accepted {
                Ok((stream, peer)) => {
                    accept_failures = 0;
                    stats.accepted += 1;
                    let conn_id = generate_correlation_id();
                    info!(conn_id = %conn_id, peer = %peer, "Connection received");
                    let _ = stream.set_nodelay(true);

                    let span = info_span!("conn", conn_id = %conn_id);
                    tokio::spawn(
                        supervisor::supervise(
                            transport.clone(),
                            stream,
                            peer,
                            emitter.clone(),
                            conn_id,
                            settings.channel_wait,
                        )
                        .instrument(span),
                    );
                }
                Err(e) if shutdown.is_triggered() => {
                    debug!(error = %e, "Accept failed during shutdown");
                    break;
                }
                Err(e) => {
                    // Persistent failures (EMFILE) would otherwise spin and flood the log
                    accept_failures = accept_failures.saturating_add(1);
                    if accept_failures % 100 == 1 {
                        warn!(error = %e, consecutive = accept_failures, "Failed to accept connection");
                    }
                    tokio::time::sleep(accept_error_backoff(
                        accept_failures,
                        settings.accept_poll_interval,
                    ))
                    .await;
                }
            }
        }

        stats
    }
}

fn accept_error_backoff(consecutive: u32, cap: Duration) -> Duration {
    let doublings = consecutive.saturating_sub(1).min(16);
    ACCEPT_ERROR_BACKOFF.saturating_mul(1 << doublings).min(cap)
}
