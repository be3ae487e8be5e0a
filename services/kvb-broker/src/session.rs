//! Connection Session (C4): per-connection state held by the broker.
//!
//! A plain struct behind an `Arc`, mutable fields behind their own lock
//! rather than one big session-wide mutex, so the fan-out path only ever
//! takes the narrow `subscriptions` lock.

use kvb_protocol::{Envelope, Notification, Platform};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, RwLock};

/// A message queued for delivery to a session's outbound writer task.
/// Kept as an enum rather than pre-serialized text so logging/backpressure
/// decisions can inspect the message shape before encoding it.
#[derive(Clone, Debug)]
pub enum Outbound {
    Envelope(Envelope),
    Notification(Notification),
    Ping,
    Close,
}

/// Bound chosen to absorb a burst of fan-out notifications without
/// unbounded memory growth; a full queue causes the sender to drop the
/// message rather than block: fan-out must not stall the mutator.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub struct SessionHandle {
    pub client_id: String,
    pub platform: Platform,
    pub alive: AtomicBool,
    pub subscriptions: RwLock<HashSet<(String, String)>>,
    outbound: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    pub fn new(client_id: String, platform: Platform) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Self {
            client_id,
            platform,
            alive: AtomicBool::new(true),
            subscriptions: RwLock::new(HashSet::new()),
            outbound: tx,
        };
        (handle, rx)
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Best-effort, fire-and-forget delivery: a full queue means a
    /// slow subscriber, and the update is dropped rather than awaited.
    pub fn try_send(&self, message: Outbound) -> bool {
        self.outbound.try_send(message).is_ok()
    }
}
