//! Connection registry — the set of live ingestion streams.
//!
//! DESIGN
//! ======
//! Fan-out and introspection only; ordering and persistence live in the
//! telemetry buffer. Each stream registers an outbound text channel under a
//! generated handle. `broadcast` is best-effort: a full or closed channel is
//! skipped, never awaited.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Handle to one registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(Uuid);

/// Process-wide registry of live stream senders.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<ConnectionHandle, mpsc::Sender<String>>>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream. Returns its handle and the receiving half the
    /// stream task forwards to the socket.
    pub async fn connect(&self) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let handle = ConnectionHandle(Uuid::new_v4());
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        self.connections.write().await.insert(handle, tx);
        (handle, rx)
    }

    /// Remove a stream. No-op if the handle is already gone.
    pub async fn disconnect(&self, handle: ConnectionHandle) {
        self.connections.write().await.remove(&handle);
    }

    /// Send `text` to every registered stream; send errors are swallowed.
    pub async fn broadcast(&self, text: &str) {
        let senders: Vec<mpsc::Sender<String>> = {
            let connections = self.connections.read().await;
            connections.values().cloned().collect()
        };
        for tx in senders {
            let _ = tx.try_send(text.to_owned());
        }
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
