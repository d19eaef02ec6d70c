//! Server-role SSH session start/teardown behind a small trait seam.
//!
//! [`RusshTransport`] is the production implementation. The supervisor only
//! sees [`Transport`] and [`HandshakeSession`], so tests can drive it with a
//! fake that counts opens and closes.

use crate::config::types::ServerConfig;
use crate::ssh::capture::CaptureHandler;
use crate::ssh::handler::{HoneypotHandler, SessionSignal};
use futures::future::BoxFuture;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

/// Upper bound for each teardown step (polite disconnect, then waiting for the session task).
pub const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("SSH negotiation failed: {0}")]
    Handshake(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SessionError {
    /// Errors caused by the peer or the wire rather than by this process.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SessionError::Handshake(_) | SessionError::Timeout(_))
    }

    fn from_session(err: anyhow::Error) -> Self {
        // Handler callbacks run inside the russh session task; a panic there surfaces as a join error
        if let Some(russh::Error::Join(join)) = err.downcast_ref::<russh::Error>() {
            return SessionError::Unexpected(format!("session task failed: {}", join));
        }
        if let Some(join) = err.downcast_ref::<tokio::task::JoinError>() {
            return SessionError::Unexpected(format!("session task failed: {}", join));
        }
        if let Some(ssh) = err.downcast_ref::<russh::Error>() {
            return SessionError::Handshake(ssh.to_string());
        }
        match err.downcast::<io::Error>() {
            Ok(io_err) => SessionError::Io(io_err),
            Err(other) => SessionError::Unexpected(format!("{:#}", other)),
        }
    }
}

/// Result of waiting for the peer to request a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAcceptance {
    /// A channel was approved and immediately closed
    Opened,
    /// No channel request arrived within the wait
    TimedOut,
    /// The peer ended the session first
    PeerClosed,
}

/// A started server-role session.
pub trait HandshakeSession: Send + 'static {
    /// Wait at most `wait` for an approved channel request.
    fn accept_channel(
        &mut self,
        wait: Duration,
    ) -> impl Future<Output = Result<ChannelAcceptance, SessionError>> + Send;

    /// Tear the session down and release the socket. Consumes the session.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Starts server-role sessions on accepted sockets.
pub trait Transport: Send + Sync + 'static {
    type Session: HandshakeSession;

    /// Run the handshake on `stream` until key exchange completes and the peer
    /// asks to authenticate. Fails if the peer never gets that far.
    fn start<S, C>(
        &self,
        stream: S,
        peer: SocketAddr,
        conn_id: String,
        capture: C,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        C: CaptureHandler;
}

/// Build the russh server configuration presented to every peer.
pub fn build_russh_config(
    host_key: russh::keys::PrivateKey,
    server: &ServerConfig,
) -> russh::server::Config {
    let mut ssh_config = russh::server::Config::default();
    ssh_config.keys.push(host_key);
    ssh_config.server_id = russh::SshId::Standard(server.server_id.clone());
    ssh_config.methods = russh::MethodSet::from([russh::MethodKind::Password].as_slice());
    ssh_config.auth_rejection_time = server.auth_rejection_time;
    ssh_config.auth_rejection_time_initial = Some(Duration::from_secs(0));
    ssh_config.inactivity_timeout = Some(server.handshake_timeout + server.channel_wait);
    ssh_config
}

pub struct RusshTransport {
    config: Arc<russh::server::Config>,
    handshake_timeout: Duration,
}

impl RusshTransport {
    pub fn new(config: russh::server::Config, handshake_timeout: Duration) -> Self {
        Self {
            config: Arc::new(config),
            handshake_timeout,
        }
    }
}

impl Transport for RusshTransport {
    type Session = RusshSession;

    async fn start<S, C>(
        &self,
        stream: S,
        peer: SocketAddr,
        conn_id: String,
        capture: C,
    ) -> Result<RusshSession, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        C: CaptureHandler,
    {
        let deadline = Instant::now() + self.handshake_timeout;
        let token = CancellationToken::new();
        let stream = CancellableStream::new(stream, token.clone());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let handler = HoneypotHandler::new(capture, peer, conn_id, signal_tx);

        let running = tokio::time::timeout_at(
            deadline,
            russh::server::run_stream(self.config.clone(), stream, handler),
        )
        .await
        .map_err(|_| SessionError::Timeout("identification exchange".into()))?
        .map_err(SessionError::from_session)?;

        let handle = running.handle();
        let mut session = RusshSession {
            handle,
            task: Box::pin(running),
            task_done: false,
            signals: signal_rx,
            signals_open: true,
            pending_channel: None,
            token,
        };

        match session.await_key_exchange(deadline).await {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }
}

/// A running russh session plus the plumbing needed to tear it down.
pub struct RusshSession {
    handle: russh::server::Handle,
    task: BoxFuture<'static, Result<(), anyhow::Error>>,
    task_done: bool,
    signals: mpsc::UnboundedReceiver<SessionSignal>,
    signals_open: bool,
    pending_channel: Option<russh::Channel<russh::server::Msg>>,
    token: CancellationToken,
}

impl RusshSession {
    async fn await_key_exchange(&mut self, deadline: Instant) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                biased;
                signal = self.signals.recv(), if self.signals_open => match signal {
                    Some(SessionSignal::AuthStarted) => return Ok(()),
                    Some(SessionSignal::ChannelOpened(channel)) => {
                        self.pending_channel = Some(channel);
                        return Ok(());
                    }
                    None => self.signals_open = false,
                },
                result = &mut self.task, if !self.task_done => {
                    self.task_done = true;
                    if self.drain_signals() {
                        return ended_after_key_exchange(result);
                    }
                    return Err(match result {
                        Ok(()) => SessionError::Handshake("peer closed before completing key exchange".into()),
                        Err(e) => SessionError::from_session(e),
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(SessionError::Timeout("key exchange did not complete".into()));
                }
            }
        }
    }

    /// Consume queued signals after the session task ended. Returns whether key exchange was reached.
    fn drain_signals(&mut self) -> bool {
        let mut reached = false;
        while let Ok(signal) = self.signals.try_recv() {
            match signal {
                SessionSignal::AuthStarted | SessionSignal::ChannelOpened(_) => reached = true,
            }
        }
        reached
    }
}

/// A session task that ended after key exchange is a peer hangup unless it
/// failed inside this process.
fn ended_after_key_exchange(result: Result<(), anyhow::Error>) -> Result<(), SessionError> {
    match result.map_err(SessionError::from_session) {
        Ok(()) => Ok(()),
        Err(SessionError::Unexpected(detail)) => Err(SessionError::Unexpected(detail)),
        Err(e) => {
            debug!(error = %e, "Peer ended the session after key exchange");
            Ok(())
        }
    }
}

impl HandshakeSession for RusshSession {
    async fn accept_channel(&mut self, wait: Duration) -> Result<ChannelAcceptance, SessionError> {
        if let Some(channel) = self.pending_channel.take() {
            let _ = channel.close().await;
            return Ok(ChannelAcceptance::Opened);
        }
        if self.task_done {
            return Ok(ChannelAcceptance::PeerClosed);
        }
        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                signal = self.signals.recv(), if self.signals_open => match signal {
                    Some(SessionSignal::AuthStarted) => {}
                    Some(SessionSignal::ChannelOpened(channel)) => {
                        let _ = channel.close().await;
                        return Ok(ChannelAcceptance::Opened);
                    }
                    None => self.signals_open = false,
                },
                result = &mut self.task, if !self.task_done => {
                    self.task_done = true;
                    self.drain_signals();
                    return ended_after_key_exchange(result).map(|()| ChannelAcceptance::PeerClosed);
                }
                _ = &mut sleep => return Ok(ChannelAcceptance::TimedOut),
            }
        }
    }

    async fn close(mut self) {
        if !self.task_done {
            let _ = tokio::time::timeout(
                TEARDOWN_GRACE,
                self.handle.disconnect(
                    russh::Disconnect::ByApplication,
                    String::new(),
                    "en".to_string(),
                ),
            )
            .await;
            self.token.cancel();
            if tokio::time::timeout(TEARDOWN_GRACE, &mut self.task)
                .await
                .is_err()
            {
                debug!("session task still running after teardown grace; socket already aborted");
            }
            self.task_done = true;
        }
        self.token.cancel();
    }
}

impl Drop for RusshSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Socket wrapper that fails all I/O once its token is cancelled, so the
/// russh task drops the underlying connection even if the peer stays silent.
pub struct CancellableStream<S> {
    inner: S,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> CancellableStream<S> {
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self {
            inner,
            cancelled: Box::pin(token.cancelled_owned()),
        }
    }

    fn poll_cancelled(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        match self.cancelled.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session torn down",
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CancellableStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_cancelled(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CancellableStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_cancelled(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Poll::Ready(err) = this.poll_cancelled(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
