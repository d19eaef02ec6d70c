//! Shared helpers for end-to-end tests: an in-process honeypot on an
//! ephemeral port, wired to a local GELF collector.

#[path = "../unit/test_support.rs"]
pub mod test_support;

use sshpot::config::types::ServerConfig;
use sshpot::emitter::EventEmitter;
use sshpot::server::{Listener, ListenerStats, ServeSettings};
use sshpot::shutdown::ShutdownSignal;
use sshpot::ssh::keys::generate_host_key;
use sshpot::ssh::transport::{build_russh_config, RusshTransport};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::{Duration, Instant};

pub use test_support::UdpCollector;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Get an OS-assigned free port
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Minimal russh client handler for testing
pub struct TestClientHandler;

impl russh::client::Handler for TestClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A running honeypot plus the collector its events are sent to.
pub struct TestHoneypot {
    pub addr: SocketAddr,
    pub collector: UdpCollector,
    pub emitter: Arc<EventEmitter>,
    pub shutdown: ShutdownSignal,
    pub task: tokio::task::JoinHandle<ListenerStats>,
}

impl TestHoneypot {
    /// Stop accepting and return the listener's counters.
    pub async fn stop(self) -> (ListenerStats, UdpCollector) {
        self.shutdown.trigger("test");
        let stats = tokio::time::timeout(Duration::from_secs(3), self.task)
            .await
            .expect("listener did not stop")
            .unwrap();
        (stats, self.collector)
    }
}

/// Start a honeypot on 127.0.0.1 with a fresh host key.
pub async fn start_honeypot(channel_wait: Duration) -> TestHoneypot {
    let collector = UdpCollector::bind().await;
    let server = ServerConfig {
        bind_address: "127.0.0.1".parse().unwrap(),
        port: 0,
        channel_wait,
        handshake_timeout: HANDSHAKE_TIMEOUT,
        accept_poll_interval: Duration::from_millis(50),
        ..ServerConfig::default()
    };
    let transport = Arc::new(RusshTransport::new(
        build_russh_config(generate_host_key().unwrap(), &server),
        server.handshake_timeout,
    ));
    let emitter = Arc::new(EventEmitter::new(&collector.gelf_config()));
    let listener = Listener::bind(server.listen_addr()).await.unwrap();
    let addr = listener.local_addr();
    let shutdown = ShutdownSignal::new();

    let task = tokio::spawn(listener.serve(
        transport,
        emitter.clone(),
        shutdown.clone(),
        ServeSettings {
            accept_poll_interval: server.accept_poll_interval,
            channel_wait: server.channel_wait,
        },
    ));

    TestHoneypot {
        addr,
        collector,
        emitter,
        shutdown,
        task,
    }
}

/// Connect a russh client that accepts any host key.
pub async fn connect_client(addr: SocketAddr) -> russh::client::Handle<TestClientHandler> {
    russh::client::connect(
        Arc::new(russh::client::Config::default()),
        addr,
        TestClientHandler,
    )
    .await
    .unwrap()
}

/// Poll until the server has torn the session down, returning when it happened.
pub async fn wait_closed(
    handle: &russh::client::Handle<TestClientHandler>,
    limit: Duration,
) -> Option<Instant> {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if handle.is_closed() {
            return Some(Instant::now());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}
