//! Peer blacklist
//!
//! Peers that serve corrupt data are benched for a cool-down period; search
//! and the publish loop skip benched peers.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use tornet_core::digest::Digest;

pub struct Blacklist {
    cooldown: Duration,
    benched: Mutex<HashMap<Digest, Instant>>,
}

impl Blacklist {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            benched: Mutex::new(HashMap::new()),
        }
    }

    /// Bench a peer until the cool-down elapses.
    pub fn insert(&self, peer: Digest) {
        warn!(peer = %peer, cooldown = ?self.cooldown, "blacklisting peer");
        self.benched.lock().insert(peer, Instant::now());
    }

    /// True while the peer's cool-down is still running.
    pub fn contains(&self, peer: &Digest) -> bool {
        let mut benched = self.benched.lock();
        match benched.get(peer) {
            Some(since) if since.elapsed() < self.cooldown => true,
            Some(_) => {
                benched.remove(peer);
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.benched.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.benched.lock().is_empty()
    }
}
