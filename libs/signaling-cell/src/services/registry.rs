// libs/signaling-cell/src/services/registry.rs
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ConnectionKey, ConnectionSender, OutboundMessage, SignalingConfig};

struct ConnectionEntry {
    sender: ConnectionSender,
    generation: u64,
}

struct RegistryInner {
    connections: HashMap<ConnectionKey, ConnectionEntry>,
    reconnect_attempts: HashMap<ConnectionKey, u32>,
    next_generation: u64,
}

/// In-process connection registry for one API server. Constructed once
/// in `apps/api` and handed to both the WebSocket driver and the REST
/// call-control handlers; every clone shares the same map.
///
/// A registration carries a generation number. Close bookkeeping only
/// acts when the generation still matches, so a client that reconnects
/// inside the tolerance window keeps its fresh registration while the
/// old socket's deferred sweep fizzles.
pub struct SignalingRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    settings: SignalingConfig,
}

impl SignalingRegistry {
    pub fn new(settings: SignalingConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                connections: HashMap::new(),
                reconnect_attempts: HashMap::new(),
                next_generation: 0,
            })),
            settings,
        }
    }

    pub fn settings(&self) -> &SignalingConfig {
        &self.settings
    }

    /// Register (or re-register) the socket for a participant. Returns
    /// the generation the caller must hand back to `connection_closed`.
    pub async fn register(&self, key: ConnectionKey, sender: ConnectionSender) -> u64 {
        let mut inner = self.inner.write().await;
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let previous = inner
            .connections
            .insert(key, ConnectionEntry { sender, generation });

        if previous.is_some() {
            debug!("Re-registered connection {} (generation {})", key, generation);
        } else {
            debug!("Registered connection {} (generation {})", key, generation);
        }
        generation
    }

    pub async fn lookup(&self, appointment_id: Uuid, user_id: Uuid) -> Option<ConnectionSender> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&ConnectionKey::new(appointment_id, user_id))
            .map(|entry| entry.sender.clone())
    }

    /// Fan a payload out to every connection of the appointment except
    /// `exclude_user`. Matching is exact key-field equality. Returns
    /// the delivered count; zero receivers is not an error.
    pub async fn broadcast(
        &self,
        appointment_id: Uuid,
        message: &str,
        exclude_user: Option<Uuid>,
    ) -> usize {
        let inner = self.inner.read().await;
        let mut delivered = 0;

        for (key, entry) in inner.connections.iter() {
            if key.appointment_id != appointment_id {
                continue;
            }
            if Some(key.user_id) == exclude_user {
                continue;
            }

            if entry.sender.send(OutboundMessage::Payload(message.to_string())).is_ok() {
                delivered += 1;
            } else {
                warn!("Writer task for {} is gone, skipping delivery", key);
            }
        }

        debug!(
            "Broadcast for appointment {} reached {} connections",
            appointment_id, delivered
        );
        delivered
    }

    /// Drop a connection and its reconnect counter immediately.
    pub async fn remove(&self, key: ConnectionKey) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(&key);
        inner.reconnect_attempts.remove(&key);
        debug!("Removed connection {}", key);
    }

    /// Bookkeeping for a socket that stopped. The entry is not removed
    /// on the spot: the counter goes up and a sweep is scheduled after
    /// an escalating delay, leaving the client room to reconnect. Past
    /// `max_reconnect_attempts` the entry and counter go immediately.
    pub async fn connection_closed(&self, key: ConnectionKey, generation: u64) {
        let attempts;
        {
            let mut inner = self.inner.write().await;

            let owns_entry = matches!(
                inner.connections.get(&key),
                Some(entry) if entry.generation == generation
            );
            if !owns_entry {
                // A newer registration took the key, or it is already gone.
                return;
            }

            attempts = inner.reconnect_attempts.get(&key).copied().unwrap_or(0) + 1;

            if attempts > self.settings.max_reconnect_attempts {
                inner.connections.remove(&key);
                inner.reconnect_attempts.remove(&key);
                info!(
                    "Connection {} dropped {} times, removing permanently",
                    key, attempts
                );
                return;
            }

            inner.reconnect_attempts.insert(key, attempts);
        }

        let delay = self.settings.reconnect_base_delay * attempts;
        debug!(
            "Connection {} closed (attempt {}), sweeping in {:?}",
            key, attempts, delay
        );

        let registry_inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut inner = registry_inner.write().await;
            let still_stale = matches!(
                inner.connections.get(&key),
                Some(entry) if entry.generation == generation
            );
            if still_stale {
                inner.connections.remove(&key);
                inner.reconnect_attempts.remove(&key);
                debug!("Swept stale connection {} (generation {})", key, generation);
            }
        });
    }

    pub async fn active_connections(&self, appointment_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner
            .connections
            .keys()
            .filter(|key| key.appointment_id == appointment_id)
            .count()
    }

    pub async fn is_registered(&self, key: ConnectionKey) -> bool {
        let inner = self.inner.read().await;
        inner.connections.contains_key(&key)
    }

    pub async fn reconnect_attempts(&self, key: ConnectionKey) -> u32 {
        let inner = self.inner.read().await;
        inner.reconnect_attempts.get(&key).copied().unwrap_or(0)
    }
}

impl Default for SignalingRegistry {
    fn default() -> Self {
        Self::new(SignalingConfig::default())
    }
}

impl Clone for SignalingRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            settings: self.settings,
        }
    }
}
