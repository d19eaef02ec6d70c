use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::net::SocketAddr;

/// Record kinds understood by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    LoginAttempt,
    HandshakeWarning,
    HandlerError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoginAttempt => "login_attempt",
            EventKind::HandshakeWarning => "handshake_warning",
            EventKind::HandlerError => "handler_error",
        }
    }

    /// Syslog severity used as the GELF `level`.
    pub fn level(&self) -> u8 {
        match self {
            EventKind::LoginAttempt => 6,
            EventKind::HandshakeWarning => 4,
            EventKind::HandlerError => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured record. Built once, never mutated, handed to the emitter by value.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum HoneypotEvent {
    LoginAttempt {
        timestamp: DateTime<Utc>,
        correlation_id: String,
        source_ip: String,
        source_port: u16,
        username: String,
        password: String,
        /// 1-based index of this attempt within its connection
        attempt: u32,
    },
    HandshakeWarning {
        timestamp: DateTime<Utc>,
        correlation_id: String,
        source_ip: String,
        source_port: u16,
        error: String,
    },
    HandlerError {
        timestamp: DateTime<Utc>,
        correlation_id: String,
        source_ip: String,
        source_port: u16,
        error: String,
    },
}

impl HoneypotEvent {
    /// Capture a submitted credential pair exactly as received.
    pub fn login_attempt(
        source: &SocketAddr,
        username: &str,
        password: &str,
        attempt: u32,
        cid: &str,
    ) -> Self {
        Self::LoginAttempt {
            timestamp: Utc::now(),
            correlation_id: cid.to_string(),
            source_ip: source.ip().to_string(),
            source_port: source.port(),
            username: username.to_string(),
            password: password.to_string(),
            attempt,
        }
    }

    pub fn handshake_warning(source: &SocketAddr, error: &str, cid: &str) -> Self {
        Self::HandshakeWarning {
            timestamp: Utc::now(),
            correlation_id: cid.to_string(),
            source_ip: source.ip().to_string(),
            source_port: source.port(),
            error: error.to_string(),
        }
    }

    pub fn handler_error(source: &SocketAddr, error: &str, cid: &str) -> Self {
        Self::HandlerError {
            timestamp: Utc::now(),
            correlation_id: cid.to_string(),
            source_ip: source.ip().to_string(),
            source_port: source.port(),
            error: error.to_string(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::LoginAttempt { .. } => EventKind::LoginAttempt,
            Self::HandshakeWarning { .. } => EventKind::HandshakeWarning,
            Self::HandlerError { .. } => EventKind::HandlerError,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::LoginAttempt { timestamp, .. }
            | Self::HandshakeWarning { timestamp, .. }
            | Self::HandlerError { timestamp, .. } => *timestamp,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::LoginAttempt { correlation_id, .. }
            | Self::HandshakeWarning { correlation_id, .. }
            | Self::HandlerError { correlation_id, .. } => correlation_id,
        }
    }

    /// Human-readable summary line for the collector.
    pub fn short_message(&self) -> &'static str {
        match self {
            Self::LoginAttempt { .. } => "SSH login attempt",
            Self::HandshakeWarning { .. } => "SSH exception during connection handling",
            Self::HandlerError { .. } => "Unexpected error during connection handling",
        }
    }

    /// Attribute name to value mapping, without the kind tag and timestamp.
    pub fn attributes(&self) -> Map<String, Value> {
        let mut map = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.remove("event_type");
        map.remove("timestamp");
        map
    }
}
