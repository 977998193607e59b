//! In-memory overlay simulation
//!
//! Implements the `Routing` and `Transport` seams over a process-local set
//! of nodes. Used by the integration tests and by `serve`'s development
//! mode; a real deployment plugs a Kademlia table and a UDT/QUIC transport
//! into the same traits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};

use crate::routing::Routing;
use crate::session::{ChunkService, ChunkSession};
use crate::transport::{Session, Transport};

/// A process-local set of reachable nodes.
pub struct SimOverlay {
    nodes: RwLock<HashMap<Digest, Arc<ChunkService>>>,
}

impl SimOverlay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: RwLock::new(HashMap::new()),
        })
    }

    /// Register a node's chunk service as reachable.
    pub fn add_node(&self, service: Arc<ChunkService>) {
        self.nodes.write().insert(service.node_id(), service);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// A routing view for the node with the given id.
    pub fn routing(self: &Arc<Self>, self_id: Digest) -> Arc<dyn Routing> {
        Arc::new(SimRouting {
            overlay: Arc::clone(self),
            self_id,
        })
    }

    /// A transport view for the node with the given id.
    pub fn transport(self: &Arc<Self>, self_id: Digest) -> Arc<dyn Transport> {
        Arc::new(SimTransport {
            overlay: Arc::clone(self),
            self_id,
        })
    }

    /// All known node ids ordered by XOR distance to `target`.
    fn closest(&self, target: &Digest, k: usize) -> Vec<Digest> {
        let nodes = self.nodes.read();
        let mut ids: Vec<Digest> = nodes.keys().copied().collect();
        ids.sort_by_key(|id| id.distance(target));
        ids.truncate(k);
        ids
    }
}

/// Global-view routing: every registered node is one hop away.
pub struct SimRouting {
    overlay: Arc<SimOverlay>,
    self_id: Digest,
}

#[async_trait]
impl Routing for SimRouting {
    fn self_id(&self) -> Digest {
        self.self_id
    }

    async fn lookup(&self, target: &Digest, k: usize, _alpha: usize) -> Vec<Digest> {
        self.overlay.closest(target, k)
    }

    fn closer_peers(&self, target: &Digest, k: usize) -> Vec<Digest> {
        self.overlay.closest(target, k)
    }
}

/// Transport that dispatches straight into the remote node's session.
pub struct SimTransport {
    overlay: Arc<SimOverlay>,
    self_id: Digest,
}

#[async_trait]
impl Transport for SimTransport {
    async fn connect(&self, peer: &Digest) -> Result<Arc<dyn Session>> {
        let service = {
            let nodes = self.overlay.nodes.read();
            nodes.get(peer).cloned()
        };
        let service =
            service.ok_or_else(|| TornetError::NotFound(format!("unreachable peer {}", peer)))?;
        Ok(Arc::new(SimSession {
            session: service.open_session(self.self_id),
        }))
    }
}

struct SimSession {
    session: ChunkSession,
}

#[async_trait]
impl Session for SimSession {
    async fn invoke(&self, method: u16, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.session.dispatch(method, &payload)
    }
}
