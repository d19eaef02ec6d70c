//! Handshake hooks: which channels to allow, which auth methods to advertise,
//! and what to do with a submitted password.

use crate::emitter::events::HoneypotEvent;
use crate::emitter::EventEmitter;
use crate::utils::escape_for_log;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Channel types a peer can ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Session,
    DirectTcpip,
    ForwardedTcpip,
    X11,
    DirectStreamlocal,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Session => f.write_str("session"),
            ChannelKind::DirectTcpip => f.write_str("direct-tcpip"),
            ChannelKind::ForwardedTcpip => f.write_str("forwarded-tcpip"),
            ChannelKind::X11 => f.write_str("x11"),
            ChannelKind::DirectStreamlocal => f.write_str("direct-streamlocal@openssh.com"),
        }
    }
}

/// SSH channel-open failure reason codes (RFC 4254 section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AdministrativelyProhibited = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDecision {
    Accept,
    Reject(RejectReason),
}

impl ChannelDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, ChannelDecision::Accept)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Password,
}

impl AuthMethod {
    pub fn method_kind(&self) -> russh::MethodKind {
        match self {
            AuthMethod::Password => russh::MethodKind::Password,
        }
    }
}

/// Outcome of a password check. There is no success variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied;

const PASSWORD_ONLY: &[AuthMethod] = &[AuthMethod::Password];

/// Hooks consulted by the SSH handler during a handshake.
pub trait CaptureHandler: Send + 'static {
    fn channel_request(&mut self, kind: &ChannelKind) -> ChannelDecision;

    fn allowed_auth_methods(&self, username: &str) -> &[AuthMethod];

    fn password_auth(&mut self, username: &str, password: &str) -> Denied;
}

/// Records every credential pair for one connection and sends it to the collector.
pub struct CredentialCapture {
    peer: SocketAddr,
    conn_id: String,
    emitter: Arc<EventEmitter>,
    attempts: u32,
}

impl CredentialCapture {
    pub fn new(peer: SocketAddr, conn_id: impl Into<String>, emitter: Arc<EventEmitter>) -> Self {
        Self {
            peer,
            conn_id: conn_id.into(),
            emitter,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl CaptureHandler for CredentialCapture {
    fn channel_request(&mut self, kind: &ChannelKind) -> ChannelDecision {
        match kind {
            ChannelKind::Session => ChannelDecision::Accept,
            _ => ChannelDecision::Reject(RejectReason::AdministrativelyProhibited),
        }
    }

    fn allowed_auth_methods(&self, _username: &str) -> &[AuthMethod] {
        PASSWORD_ONLY
    }

    fn password_auth(&mut self, username: &str, password: &str) -> Denied {
        self.attempts += 1;
        info!(
            conn_id = %self.conn_id,
            peer = %self.peer,
            username = %escape_for_log(username),
            password = %escape_for_log(password),
            attempt = self.attempts,
            "SSH login attempt"
        );
        self.emitter.emit(HoneypotEvent::login_attempt(
            &self.peer,
            username,
            password,
            self.attempts,
            &self.conn_id,
        ));
        Denied
    }
}
