//! GELF 1.1 encoding and the UDP sender used by the emitter's writer task.
//!
//! Records at or below the chunk size travel as a single datagram of plain
//! JSON. Larger records are split into GELF chunks: each datagram starts with
//! the magic bytes `0x1e 0x0f`, an 8-byte message id, the chunk index and the
//! chunk count, followed by a slice of the JSON payload.

use super::events::HoneypotEvent;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

pub const GELF_VERSION: &str = "1.1";
pub const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
pub const CHUNK_HEADER_LEN: usize = 12;
pub const MAX_CHUNKS: usize = 128;
pub const LOGGER_NAME: &str = "sshpot";

/// Re-resolve the collector address at most this often.
const RESOLVE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GelfError {
    #[error("record needs {chunks} chunks (max {MAX_CHUNKS})")]
    TooLarge { chunks: usize },
    #[error("serializing record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("collector address {0} did not resolve")]
    Unresolved(String),
    #[error("sending to collector: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns events into GELF datagrams.
#[derive(Debug, Clone)]
pub struct GelfEncoder {
    source_host: String,
    chunk_size: usize,
}

impl GelfEncoder {
    pub fn new(source_host: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            source_host: source_host.into(),
            chunk_size,
        }
    }

    /// Build the GELF message object. Every event attribute becomes an `_`-prefixed field.
    pub fn message(&self, event: &HoneypotEvent) -> Value {
        let ts = event.timestamp();
        let mut fields = Map::new();
        fields.insert("version".into(), json!(GELF_VERSION));
        fields.insert("host".into(), json!(self.source_host));
        fields.insert("short_message".into(), json!(event.short_message()));
        fields.insert(
            "timestamp".into(),
            json!(ts.timestamp_millis() as f64 / 1000.0),
        );
        fields.insert("level".into(), json!(event.kind().level()));
        fields.insert("_event".into(), json!(event.kind().as_str()));
        fields.insert("_logger_name".into(), json!(LOGGER_NAME));
        for (name, value) in event.attributes() {
            fields.insert(format!("_{}", name), value);
        }
        Value::Object(fields)
    }

    /// Encode an event into one or more datagrams ready to send.
    pub fn encode(&self, event: &HoneypotEvent) -> Result<Vec<Vec<u8>>, GelfError> {
        let payload = serde_json::to_vec(&self.message(event))?;
        if payload.len() <= self.chunk_size {
            return Ok(vec![payload]);
        }
        chunk_payload(&payload, self.chunk_size, rand::random::<u64>().to_be_bytes())
    }
}

/// Split a serialized record into GELF chunks of at most `chunk_size` payload bytes each.
pub fn chunk_payload(
    payload: &[u8],
    chunk_size: usize,
    message_id: [u8; 8],
) -> Result<Vec<Vec<u8>>, GelfError> {
    let chunks = payload.len().div_ceil(chunk_size);
    if chunks > MAX_CHUNKS {
        return Err(GelfError::TooLarge { chunks });
    }
    Ok(payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(seq, piece)| {
            let mut datagram = Vec::with_capacity(CHUNK_HEADER_LEN + piece.len());
            datagram.extend_from_slice(&CHUNK_MAGIC);
            datagram.extend_from_slice(&message_id);
            datagram.push(seq as u8);
            datagram.push(chunks as u8);
            datagram.extend_from_slice(piece);
            datagram
        })
        .collect())
}

/// Hostname reported in the GELF `host` field when none is configured.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| LOGGER_NAME.to_string())
}

/// Fire-and-forget UDP delivery to a GELF collector.
///
/// Owned by the emitter's writer task, so it needs no internal locking.
pub struct GelfUdpSender {
    destination: String,
    encoder: GelfEncoder,
    resolved: Option<(SocketAddr, Instant)>,
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
}

impl GelfUdpSender {
    pub fn new(destination: impl Into<String>, encoder: GelfEncoder) -> Self {
        Self {
            destination: destination.into(),
            encoder,
            resolved: None,
            v4: None,
            v6: None,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Encode and send one event. Errors are returned for logging only; nothing is retried.
    pub async fn send(&mut self, event: &HoneypotEvent) -> Result<(), GelfError> {
        let datagrams = self.encoder.encode(event)?;
        let target = self.resolve().await?;
        let socket = self.socket_for(&target).await?;
        for datagram in &datagrams {
            socket.send_to(datagram, target).await?;
        }
        Ok(())
    }

    async fn resolve(&mut self) -> Result<SocketAddr, GelfError> {
        if let Some((addr, at)) = self.resolved {
            if at.elapsed() < RESOLVE_TTL {
                return Ok(addr);
            }
        }
        let addrs: Vec<SocketAddr> = match tokio::net::lookup_host(&self.destination).await {
            Ok(iter) => iter.collect(),
            Err(e) => {
                self.resolved = None;
                return Err(e.into());
            }
        };
        // Prefer IPv4: "localhost" commonly resolves to ::1 first while collectors listen on v4
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| GelfError::Unresolved(self.destination.clone()))?;
        self.resolved = Some((addr, Instant::now()));
        Ok(addr)
    }

    async fn socket_for(&mut self, target: &SocketAddr) -> Result<&UdpSocket, GelfError> {
        let slot = if target.is_ipv4() {
            &mut self.v4
        } else {
            &mut self.v6
        };
        if slot.is_none() {
            let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
            *slot = Some(UdpSocket::bind(bind).await?);
        }
        slot.as_ref()
            .ok_or_else(|| GelfError::Unresolved(self.destination.clone()))
    }
}
