use crate::emitter::events::HoneypotEvent;
use crate::emitter::EventEmitter;
use crate::ssh::capture::CredentialCapture;
use crate::ssh::transport::{ChannelAcceptance, HandshakeSession, SessionError, Transport};
use futures::FutureExt;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Drive one accepted connection from handshake to teardown.
///
/// Never returns an error and never lets a panic escape: every failure is
/// logged, emitted as an event, and the session (if one was started) is
/// closed exactly once.
pub async fn supervise<T, S>(
    transport: Arc<T>,
    stream: S,
    peer: SocketAddr,
    emitter: Arc<EventEmitter>,
    conn_id: String,
    channel_wait: Duration,
) where
    T: Transport,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let started = Instant::now();
    let work = handle_connection(
        transport.as_ref(),
        stream,
        peer,
        emitter.clone(),
        conn_id.clone(),
        channel_wait,
    );

    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(outcome)) => {
            debug!(
                conn_id = %conn_id,
                peer = %peer,
                outcome = ?outcome,
                duration_ms = started.elapsed().as_millis() as u64,
                "Connection closed"
            );
        }
        Ok(Err(e)) if e.is_protocol() => {
            warn!(conn_id = %conn_id, peer = %peer, error = %e, "SSH handshake failed");
            emitter.emit(HoneypotEvent::handshake_warning(&peer, &e.to_string(), &conn_id));
        }
        Ok(Err(e)) => {
            error!(conn_id = %conn_id, peer = %peer, error = %e, "Connection error");
            emitter.emit(HoneypotEvent::handler_error(&peer, &e.to_string(), &conn_id));
        }
        Err(panic) => {
            let detail = panic_message(panic.as_ref());
            error!(conn_id = %conn_id, peer = %peer, error = %detail, "Connection handler panicked");
            emitter.emit(HoneypotEvent::handler_error(
                &peer,
                &format!("panic: {}", detail),
                &conn_id,
            ));
        }
    }
}

async fn handle_connection<T, S>(
    transport: &T,
    stream: S,
    peer: SocketAddr,
    emitter: Arc<EventEmitter>,
    conn_id: String,
    channel_wait: Duration,
) -> Result<ChannelAcceptance, SessionError>
where
    T: Transport,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let capture = CredentialCapture::new(peer, conn_id.clone(), emitter);
    let mut session = transport.start(stream, peer, conn_id.clone(), capture).await?;

    // Unwinding out of accept_channel still drops the session, which releases it
    let outcome = session.accept_channel(channel_wait).await;
    session.close().await;

    if let Ok(ChannelAcceptance::Opened) = outcome {
        info!(conn_id = %conn_id, peer = %peer, "Channel opened by peer, closed without data");
    }
    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
