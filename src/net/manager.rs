use crate::net::PeerId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Tracked set of live peer connections.
///
/// The sole source of truth for duplicate-stream rejection: a second stream
/// from a registered peer is closed on arrival, and a dropped peer becomes
/// dialable again on the next discovery round.
#[derive(Debug, Default, Clone)]
pub struct ConnectionManager {
    peers: Arc<Mutex<HashSet<PeerId>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self, peer: &str) -> bool {
        self.peers.lock().expect("peer set lock poisoned").contains(peer)
    }

    pub fn added(&self, peer: PeerId) {
        self.peers.lock().expect("peer set lock poisoned").insert(peer);
    }

    pub fn dropped(&self, peer: &str) {
        self.peers.lock().expect("peer set lock poisoned").remove(peer);
    }

    pub fn connected_count(&self) -> usize {
        self.peers.lock().expect("peer set lock poisoned").len()
    }
}
