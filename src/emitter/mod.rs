pub mod events;
pub mod gelf;

use crate::config::types::GelfConfig;
use events::HoneypotEvent;
use gelf::{GelfEncoder, GelfUdpSender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const EMITTER_CHANNEL_CAPACITY: usize = 10_000;
const RECENT_EVENTS_CAPACITY: usize = 100;
const FLUSH_POLL: Duration = Duration::from_millis(10);

/// Asynchronous, fire-and-forget event emitter.
///
/// Producers hand records over with [`EventEmitter::emit`], which never blocks
/// and never fails; a single writer task ships them to the GELF collector.
pub struct EventEmitter {
    sender: mpsc::Sender<HoneypotEvent>,
    dropped_count: AtomicU64,
    /// Records accepted by the channel but not yet handed to the socket
    in_flight: Arc<AtomicU64>,
    recent_events: Arc<Mutex<VecDeque<HoneypotEvent>>>,
}

impl EventEmitter {
    /// Create an emitter shipping to the collector in `config`. Must be called inside a tokio runtime.
    pub fn new(config: &GelfConfig) -> Self {
        let source_host = config
            .source_host
            .clone()
            .unwrap_or_else(gelf::local_hostname);
        let sender_half =
            GelfUdpSender::new(config.destination(), GelfEncoder::new(source_host, config.chunk_size));
        let (sender, receiver) = mpsc::channel(EMITTER_CHANNEL_CAPACITY);
        let in_flight = Arc::new(AtomicU64::new(0));

        tokio::spawn(emitter_writer_task(receiver, sender_half, in_flight.clone()));

        Self {
            sender,
            dropped_count: AtomicU64::new(0),
            in_flight,
            recent_events: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY))),
        }
    }

    /// Create a no-op emitter for testing (no tokio runtime required).
    /// Records are kept in the recent-events buffer and otherwise discarded.
    pub fn new_noop() -> Self {
        let (sender, _receiver) = mpsc::channel(1);
        Self {
            sender,
            dropped_count: AtomicU64::new(0),
            in_flight: Arc::new(AtomicU64::new(0)),
            recent_events: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAPACITY))),
        }
    }

    /// Number of records dropped because the writer could not keep up
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Records queued for the writer task and not yet sent.
    pub fn pending(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait until every queued record has been handed to the socket, or `timeout` elapses.
    /// Returns the number of records still pending.
    pub async fn flush(&self, timeout: Duration) -> u64 {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let pending = self.pending();
            if pending == 0 || tokio::time::Instant::now() >= deadline {
                return pending;
            }
            tokio::time::sleep(FLUSH_POLL).await;
        }
    }

    /// Return the most recent records (up to `max`), newest last.
    pub fn recent_events(&self, max: usize) -> Vec<HoneypotEvent> {
        let buf = self.recent_events.lock().unwrap_or_else(|e| e.into_inner());
        let skip = buf.len().saturating_sub(max);
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn emit(&self, event: HoneypotEvent) {
        {
            let mut buf = self.recent_events.lock().unwrap_or_else(|e| e.into_inner());
            if buf.len() >= RECENT_EVENTS_CAPACITY {
                buf.pop_front();
            }
            buf.push_back(event.clone());
        }

        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if let Err(e) = self.sender.try_send(event) {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "channel full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            let dropped = self.dropped_count.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 100 == 1 {
                warn!(total_dropped = dropped, reason, "Honeypot events being dropped");
            }
        }
    }
}

async fn emitter_writer_task(
    mut receiver: mpsc::Receiver<HoneypotEvent>,
    mut sender: GelfUdpSender,
    in_flight: Arc<AtomicU64>,
) {
    let mut failures: u64 = 0;
    while let Some(event) = receiver.recv().await {
        if let Ok(json) = serde_json::to_string(&event) {
            debug!(event = %json, "Honeypot event");
        }
        if let Err(e) = sender.send(&event).await {
            failures += 1;
            if failures % 100 == 1 {
                warn!(
                    destination = sender.destination(),
                    error = %e,
                    total_failures = failures,
                    "Failed to ship event to GELF collector"
                );
            }
        }
        in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
