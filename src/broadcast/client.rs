//! Connected-client registry: tracks per-client activity and the
//! receive-broadcasts flag, and evicts idle or error-prone clients.
//!
//! Every operation here is a quick, non-blocking map lookup or a
//! `try_send`, so the registry uses a plain `std::sync::RwLock` rather than
//! `tokio::sync::RwLock` — nothing ever awaits while holding it. This is
//! what lets `ClientRegistry` implement [`Broadcaster`] directly: the
//! aggregator can call `broadcast_summary`/`broadcast_drop` synchronously
//! from its drain-and-fold critical section with no channel or spawned task
//! in between.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::aggregate::types::BroadcastSnapshot;
use crate::aggregate::Broadcaster;
use crate::broadcast::protocol::{self, OutboundEnvelope};

pub type ClientId = u64;

/// A client is dropped after this many consecutive read errors.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// A client idle longer than this is evicted by housekeeping.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Housekeeping sweep period.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

struct ClientHandle {
    sender: mpsc::Sender<OutboundEnvelope>,
    last_active: Instant,
    receive_broadcasts: bool,
    error_count: u32,
}

/// Shared, lock-guarded table of every connected client. One registry per
/// broadcast server instance, held behind `Arc` and cloned into every
/// client task and into the aggregator as its `Broadcaster`.
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientHandle>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        ClientRegistry {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new client with `ReceiveBroadcast=true`, the default on
    /// upgrade.
    pub fn register(&self, sender: mpsc::Sender<OutboundEnvelope>) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.write().unwrap().insert(
            id,
            ClientHandle {
                sender,
                last_active: Instant::now(),
                receive_broadcasts: true,
                error_count: 0,
            },
        );
        id
    }

    pub fn unregister(&self, id: ClientId) {
        self.clients.write().unwrap().remove(&id);
    }

    /// Refreshes `last_active`; called on every inbound message.
    pub fn touch(&self, id: ClientId) {
        if let Some(client) = self.clients.write().unwrap().get_mut(&id) {
            client.last_active = Instant::now();
            client.error_count = 0;
        }
    }

    pub fn set_receive_broadcasts(&self, id: ClientId, flag: bool) {
        if let Some(client) = self.clients.write().unwrap().get_mut(&id) {
            client.receive_broadcasts = flag;
        }
    }

    /// Increments the client's consecutive-error counter and returns
    /// whether it has now crossed the disconnect threshold.
    pub fn record_error(&self, id: ClientId) -> bool {
        let mut clients = self.clients.write().unwrap();
        match clients.get_mut(&id) {
            Some(client) => {
                client.error_count += 1;
                client.error_count > MAX_CONSECUTIVE_ERRORS
            }
            None => true,
        }
    }

    pub fn send_to(&self, id: ClientId, envelope: OutboundEnvelope) {
        let clients = self.clients.read().unwrap();
        if let Some(client) = clients.get(&id) {
            let _ = client.sender.try_send(envelope);
        }
    }

    /// Pushes `envelope` to every client with `receive_broadcasts == true`.
    pub fn broadcast(&self, envelope: OutboundEnvelope) {
        let clients = self.clients.read().unwrap();
        for client in clients.values().filter(|c| c.receive_broadcasts) {
            let _ = client.sender.try_send(envelope.clone());
        }
    }

    /// Evicts every client whose `last_active` is older than `IDLE_TIMEOUT`,
    /// returning the evicted ids for logging.
    pub fn sweep_idle(&self) -> Vec<ClientId> {
        let mut clients = self.clients.write().unwrap();
        let now = Instant::now();
        let stale: Vec<ClientId> = clients
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_active) > IDLE_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            clients.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        ClientRegistry::new()
    }
}

impl Broadcaster for ClientRegistry {
    fn broadcast_summary(&self, snapshot: &BroadcastSnapshot) {
        self.broadcast(protocol::broadcast_summary(snapshot));
    }

    fn broadcast_drop(&self, data: &str) {
        self.broadcast(protocol::broadcast_black(data));
    }
}
