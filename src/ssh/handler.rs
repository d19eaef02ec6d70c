use crate::ssh::capture::{CaptureHandler, ChannelDecision, ChannelKind};
use crate::utils::escape_for_log;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Notifications from the russh session task to the connection supervisor.
#[derive(Debug)]
pub enum SessionSignal {
    /// Key exchange finished and the peer asked for the user-auth service
    AuthStarted,
    /// A channel was approved; the supervisor closes it without exchanging data
    ChannelOpened(russh::Channel<russh::server::Msg>),
}

/// Per-connection russh handler. Every decision is delegated to a [`CaptureHandler`].
pub struct HoneypotHandler<C: CaptureHandler> {
    capture: C,
    peer_addr: SocketAddr,
    conn_id: String,
    signals: mpsc::UnboundedSender<SessionSignal>,
    auth_seen: bool,
}

impl<C: CaptureHandler> HoneypotHandler<C> {
    pub fn new(
        capture: C,
        peer_addr: SocketAddr,
        conn_id: impl Into<String>,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Self {
        Self {
            capture,
            peer_addr,
            conn_id: conn_id.into(),
            signals,
            auth_seen: false,
        }
    }

    fn mark_auth(&mut self) {
        if !self.auth_seen {
            self.auth_seen = true;
            let _ = self.signals.send(SessionSignal::AuthStarted);
        }
    }

    fn reject(&self, user: &str) -> russh::server::Auth {
        let methods: Vec<russh::MethodKind> = self
            .capture
            .allowed_auth_methods(user)
            .iter()
            .map(|m| m.method_kind())
            .collect();
        russh::server::Auth::Reject {
            proceed_with_methods: Some(russh::MethodSet::from(methods.as_slice())),
            partial_success: false,
        }
    }

    fn open_channel(
        &mut self,
        kind: ChannelKind,
        channel: russh::Channel<russh::server::Msg>,
    ) -> bool {
        match self.capture.channel_request(&kind) {
            ChannelDecision::Accept => {
                debug!(conn_id = %self.conn_id, peer = %self.peer_addr, kind = %kind, "Channel approved");
                let _ = self.signals.send(SessionSignal::ChannelOpened(channel));
                true
            }
            ChannelDecision::Reject(reason) => {
                info!(
                    conn_id = %self.conn_id,
                    peer = %self.peer_addr,
                    kind = %kind,
                    reason = ?reason,
                    "Channel refused"
                );
                false
            }
        }
    }
}

impl<C: CaptureHandler> russh::server::Handler for HoneypotHandler<C> {
    type Error = anyhow::Error;

    /// Runs when the `ssh-userauth` service is requested, right after key exchange.
    async fn authentication_banner(&mut self) -> Result<Option<String>, Self::Error> {
        debug!(conn_id = %self.conn_id, peer = %self.peer_addr, "Key exchange complete");
        self.mark_auth();
        Ok(None)
    }

    async fn auth_none(&mut self, user: &str) -> Result<russh::server::Auth, Self::Error> {
        self.mark_auth();
        debug!(conn_id = %self.conn_id, user = %escape_for_log(user), "auth_none (rejected)");
        Ok(self.reject(user))
    }

    async fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> Result<russh::server::Auth, Self::Error> {
        self.mark_auth();
        let _denied = self.capture.password_auth(user, password);
        Ok(self.reject(user))
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<russh::server::Auth, Self::Error> {
        self.mark_auth();
        debug!(conn_id = %self.conn_id, user = %escape_for_log(user), "publickey offered (rejected)");
        Ok(self.reject(user))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh::keys::PublicKey,
    ) -> Result<russh::server::Auth, Self::Error> {
        self.mark_auth();
        Ok(self.reject(user))
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        _submethods: &str,
        _response: Option<russh::server::Response<'_>>,
    ) -> Result<russh::server::Auth, Self::Error> {
        self.mark_auth();
        debug!(conn_id = %self.conn_id, user = %escape_for_log(user), "keyboard-interactive (rejected)");
        Ok(self.reject(user))
    }

    async fn channel_open_session(
        &mut self,
        channel: russh::Channel<russh::server::Msg>,
        _session: &mut russh::server::Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel(ChannelKind::Session, channel))
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: russh::Channel<russh::server::Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut russh::server::Session,
    ) -> Result<bool, Self::Error> {
        debug!(
            conn_id = %self.conn_id,
            host = %escape_for_log(host_to_connect),
            port = port_to_connect,
            "direct-tcpip requested"
        );
        Ok(self.open_channel(ChannelKind::DirectTcpip, channel))
    }

    async fn channel_open_forwarded_tcpip(
        &mut self,
        channel: russh::Channel<russh::server::Msg>,
        _host_to_connect: &str,
        _port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut russh::server::Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel(ChannelKind::ForwardedTcpip, channel))
    }

    async fn channel_open_x11(
        &mut self,
        channel: russh::Channel<russh::server::Msg>,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut russh::server::Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel(ChannelKind::X11, channel))
    }

    async fn channel_open_direct_streamlocal(
        &mut self,
        channel: russh::Channel<russh::server::Msg>,
        _socket_path: &str,
        _session: &mut russh::server::Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open_channel(ChannelKind::DirectStreamlocal, channel))
    }

    async fn shell_request(
        &mut self,
        channel: russh::ChannelId,
        session: &mut russh::server::Session,
    ) -> Result<(), Self::Error> {
        debug!(conn_id = %self.conn_id, "shell_request refused");
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: russh::ChannelId,
        data: &[u8],
        session: &mut russh::server::Session,
    ) -> Result<(), Self::Error> {
        debug!(
            conn_id = %self.conn_id,
            command = %escape_for_log(&String::from_utf8_lossy(data)),
            "exec_request refused"
        );
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: russh::ChannelId,
        name: &str,
        session: &mut russh::server::Session,
    ) -> Result<(), Self::Error> {
        debug!(conn_id = %self.conn_id, subsystem = %escape_for_log(name), "subsystem_request refused");
        let _ = session.channel_failure(channel);
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: russh::ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut russh::server::Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_failure(channel);
        Ok(())
    }

    /// Reject reverse port forwarding (ssh -R).
    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut russh::server::Session,
    ) -> Result<bool, Self::Error> {
        warn!(
            conn_id = %self.conn_id,
            address = %escape_for_log(address),
            port = %port,
            peer = %self.peer_addr,
            "Reverse forwarding denied (tcpip_forward)"
        );
        Ok(false)
    }
}
