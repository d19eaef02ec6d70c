mod test_support;

use sshpot::emitter::EventEmitter;
use sshpot::server::{Listener, ServeSettings};
use sshpot::shutdown::ShutdownSignal;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_support::*;
use tokio::net::TcpStream;

const POLL: Duration = Duration::from_millis(100);

fn settings(channel_wait: Duration) -> ServeSettings {
    ServeSettings {
        accept_poll_interval: POLL,
        channel_wait,
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool, limit: Duration) {
    let deadline = Instant::now() + limit;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within {limit:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Test 1: Binding to port 0 yields a usable address
// ---------------------------------------------------------------------------
#[tokio::test]
async fn bind_ephemeral_port() {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    assert_ne!(addr.port(), 0);
    TcpStream::connect(addr).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test 2: Binding an address already in use fails
// ---------------------------------------------------------------------------
#[tokio::test]
async fn bind_conflict_is_error() {
    let first = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    assert!(
        Listener::bind(first.local_addr()).await.is_err(),
        "second listener on the same port must fail"
    );
}

// ---------------------------------------------------------------------------
// Test 3: Shutdown is observed within one poll interval
// ---------------------------------------------------------------------------
#[tokio::test]
async fn shutdown_observed_within_poll_interval() {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let (transport, _) = FakeTransport::new(Script::StartProtocolError);
    let shutdown = ShutdownSignal::new();

    let serve = tokio::spawn(listener.serve(
        transport,
        Arc::new(EventEmitter::new_noop()),
        shutdown.clone(),
        settings(Duration::from_millis(100)),
    ));
    tokio::time::sleep(POLL * 2).await;

    let triggered_at = Instant::now();
    assert!(shutdown.trigger("test"));
    let stats = tokio::time::timeout(POLL * 3, serve)
        .await
        .expect("listener did not stop")
        .unwrap();
    assert!(triggered_at.elapsed() <= POLL + Duration::from_millis(150));
    assert_eq!(stats.accepted, 0);
}

// ---------------------------------------------------------------------------
// Test 4: Each accepted connection gets its own supervisor
// ---------------------------------------------------------------------------
#[tokio::test]
async fn accepted_connections_are_supervised() {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    let (transport, counters) = FakeTransport::new(Script::Session {
        credentials: vec![("root".into(), "toor".into())],
        accept: AcceptScript::PeerClosed,
    });
    let emitter = Arc::new(EventEmitter::new_noop());
    let shutdown = ShutdownSignal::new();

    let serve = tokio::spawn(listener.serve(
        transport,
        emitter.clone(),
        shutdown.clone(),
        settings(Duration::from_millis(100)),
    ));

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(TcpStream::connect(addr).await.unwrap());
    }
    wait_for(|| counters.closes.load(Ordering::SeqCst) == 3, Duration::from_secs(2)).await;

    shutdown.trigger("test");
    let stats = serve.await.unwrap();
    assert_eq!(stats.accepted, 3);
    assert_eq!(counters.get(), (3, 3, 3, 3));
    assert_eq!(emitter.recent_events(10).len(), 3);
}

// ---------------------------------------------------------------------------
// Test 5: In-flight supervisors finish on their own after the listener stops
// ---------------------------------------------------------------------------
#[tokio::test]
async fn in_flight_supervisor_outlives_listener() {
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr();
    let channel_wait = Duration::from_millis(600);
    let (transport, counters) = FakeTransport::new(Script::Session {
        credentials: vec![],
        accept: AcceptScript::WaitFull,
    });
    let shutdown = ShutdownSignal::new();

    let serve = tokio::spawn(listener.serve(
        transport,
        Arc::new(EventEmitter::new_noop()),
        shutdown.clone(),
        settings(channel_wait),
    ));

    let _client = TcpStream::connect(addr).await.unwrap();
    wait_for(|| counters.sessions.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await;

    shutdown.trigger("test");
    let stats = serve.await.unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(
        counters.closes.load(Ordering::SeqCst),
        0,
        "listener exit must not cancel in-flight sessions"
    );

    // Listening socket is gone
    assert!(TcpStream::connect(addr).await.is_err());

    wait_for(|| counters.closes.load(Ordering::SeqCst) == 1, channel_wait * 3).await;
    assert_eq!(counters.get(), (1, 1, 1, 1));
}
