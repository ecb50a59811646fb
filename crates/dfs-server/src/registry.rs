use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::info;

use dfs_p2p::{Peer, PeerHandler, TransportResult};

/// Live peers keyed by remote identity.
///
/// Registered as the transport's [`PeerHandler`], so entries appear after a
/// successful handshake and disappear when the connection's decode loop ends.
#[derive(Default)]
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, Arc<Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer, replacing any stale entry with the same identity.
    pub fn insert(&self, peer: Arc<Peer>) -> Option<Arc<Peer>> {
        let mut peers = self.peers.lock().expect("lock poisoned");
        peers.insert(peer.addr().to_string(), peer)
    }

    /// Remove `peer` if it is still the registered connection for its identity.
    pub fn remove(&self, peer: &Arc<Peer>) -> bool {
        let mut peers = self.peers.lock().expect("lock poisoned");
        match peers.get(peer.addr()) {
            Some(current) if Arc::ptr_eq(current, peer) => {
                peers.remove(peer.addr());
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, addr: &str) -> Option<Arc<Peer>> {
        self.peers.lock().expect("lock poisoned").get(addr).cloned()
    }

    /// Current peers, cloned out so no lock is held while writing to them.
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.lock().expect("lock poisoned").values().cloned().collect()
    }

    /// Sorted identities of all registered peers.
    pub fn addrs(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.peers.lock().expect("lock poisoned").keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.peers.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PeerHandler for PeerRegistry {
    async fn on_peer_connected(&self, peer: Arc<Peer>) -> TransportResult<()> {
        let addr = peer.addr().to_string();
        let outbound = peer.is_outbound();
        if self.insert(peer).is_some() {
            info!(peer = %addr, "replaced existing peer entry");
        }
        info!(peer = %addr, outbound, "peer connected");
        Ok(())
    }

    async fn on_peer_disconnected(&self, peer: &Arc<Peer>) {
        if self.remove(peer) {
            info!(peer = %peer.addr(), "peer disconnected");
        }
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("peers", &self.addrs())
            .finish()
    }
}
