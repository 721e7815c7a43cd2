//! Live-feed fan-out.
//!
//! Tracks the set of connected viewer channels per device and pushes each
//! broadcast payload to all of them. A connection whose push fails is
//! treated as dead and removed without aborting delivery to the rest.
//!
//! Each device owns its viewer list behind its own lock; the outer map lock
//! is only held long enough to clone the per-device handle, so fan-out for
//! one device never blocks subscribes or broadcasts on another. The whole
//! structure is process-local; reconnecting clients rebuild it after a
//! restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

// ---

/// Handle returned by [`BroadcastHub::subscribe`]; used to unsubscribe.
pub type ClientId = u64;

type Viewers = Arc<Mutex<Vec<(ClientId, UnboundedSender<String>)>>>;

/// Per-device sets of live subscriber connections.
pub struct BroadcastHub {
    connections: RwLock<HashMap<String, Viewers>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        // ---
        BroadcastHub {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a new viewer for a device. Returns the client id and the
    /// receiving half the connection task should drain.
    pub async fn subscribe(&self, device_id: &str) -> (ClientId, UnboundedReceiver<String>) {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let viewers = self.viewers_or_create(device_id).await;
        let mut viewers = viewers.lock().await;
        viewers.push((id, tx));
        info!(
            "Viewer {} connected to {} ({} total)",
            id,
            device_id,
            viewers.len()
        );
        (id, rx)
    }

    pub async fn unsubscribe(&self, device_id: &str, client_id: ClientId) {
        // ---
        let Some(viewers) = self.viewers_for(device_id).await else {
            return;
        };
        let remaining = {
            let mut viewers = viewers.lock().await;
            viewers.retain(|(id, _)| *id != client_id);
            viewers.len()
        };
        info!(
            "Viewer {} disconnected from {} ({} remaining)",
            client_id, device_id, remaining
        );
        if remaining == 0 {
            self.remove_if_empty(device_id).await;
        }
    }

    /// Push a serialized payload to every live viewer of a device.
    ///
    /// A device with zero viewers is a no-op. Dead connections are pruned
    /// in place under the device's own lock; neither their removal nor the
    /// fan-out itself blocks delivery on other devices.
    pub async fn broadcast(&self, device_id: &str, payload: String) {
        // ---
        let Some(viewers) = self.viewers_for(device_id).await else {
            return;
        };

        let remaining = {
            let mut viewers = viewers.lock().await;
            let before = viewers.len();
            viewers.retain(|(id, tx)| {
                let alive = tx.send(payload.clone()).is_ok();
                if !alive {
                    debug!("Dropping dead viewer {} on {}", id, device_id);
                }
                alive
            });
            if viewers.len() < before {
                debug!(
                    "Pruned {} dead viewer(s) on {}",
                    before - viewers.len(),
                    device_id
                );
            }
            viewers.len()
        };

        if remaining == 0 {
            self.remove_if_empty(device_id).await;
        }
    }

    /// Number of live viewers for a device.
    pub async fn viewer_count(&self, device_id: &str) -> usize {
        // ---
        match self.viewers_for(device_id).await {
            Some(viewers) => viewers.lock().await.len(),
            None => 0,
        }
    }

    async fn viewers_for(&self, device_id: &str) -> Option<Viewers> {
        // ---
        self.connections.read().await.get(device_id).cloned()
    }

    async fn viewers_or_create(&self, device_id: &str) -> Viewers {
        // ---
        if let Some(viewers) = self.connections.read().await.get(device_id) {
            return viewers.clone();
        }
        let mut connections = self.connections.write().await;
        connections
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }

    async fn remove_if_empty(&self, device_id: &str) {
        // ---
        let mut connections = self.connections.write().await;
        if let Some(viewers) = connections.get(device_id) {
            // Re-check under the map write lock; a subscriber may have
            // arrived since the emptiness was observed.
            if viewers.lock().await.is_empty() {
                connections.remove(device_id);
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
