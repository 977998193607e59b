//! Tornet Node
//!
//! The node runtime: configuration, the import/export chunk engine, and the
//! publish loop that maintains replication across the overlay. Long-lived
//! state (node id, stores, overlay seams) lives in an explicit
//! `NodeContext` passed by shared reference to tasks.

pub mod config;
pub mod engine;
pub mod publish;
pub mod retrieve;

pub use config::{NodeConfig, PublishSettings};
pub use engine::ChunkEngine;
pub use publish::PublishLoop;
pub use retrieve::Retriever;

use std::sync::Arc;

use rand::RngCore;

use tornet_core::digest::Digest;
use tornet_core::error::Result;
use tornet_network::{Blacklist, Routing, SessionConfig, Transport};

/// Long-lived node state shared by tasks.
pub struct NodeContext {
    pub node_id: Digest,
    pub config: NodeConfig,
    pub engine: Arc<ChunkEngine>,
    pub routing: Arc<dyn Routing>,
    pub transport: Arc<dyn Transport>,
    pub blacklist: Arc<Blacklist>,
}

impl NodeContext {
    /// Assemble a node from its configuration and overlay seams.
    pub fn new(
        node_id: Digest,
        config: NodeConfig,
        routing: Arc<dyn Routing>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let engine = Arc::new(ChunkEngine::open(
            &config.node.data_dir,
            config.storage.cache_capacity_bytes(),
        )?);
        let blacklist = Arc::new(Blacklist::new(config.publish.blacklist_cooldown()));
        Ok(Self {
            node_id,
            config,
            engine,
            routing,
            transport,
            blacklist,
        })
    }

    /// The publish loop for this node, ready to start.
    pub fn publish_loop(&self) -> Arc<PublishLoop> {
        PublishLoop::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.routing),
            Arc::clone(&self.transport),
            Arc::clone(&self.blacklist),
            self.config.publish.clone(),
        )
    }

    /// The serving side of the chunk protocol, backed by this node's cache.
    pub fn chunk_service(&self) -> Arc<tornet_network::ChunkService> {
        tornet_network::ChunkService::new(
            self.node_id,
            Arc::clone(self.engine.cache()),
            Arc::clone(&self.routing),
            SessionConfig::default(),
        )
    }
}

/// Node id: digest of the seed when given, random otherwise.
pub fn derive_node_id(seed: Option<&str>) -> Digest {
    match seed {
        Some(seed) => Digest::compute(seed.as_bytes()),
        None => {
            let mut raw = [0u8; 20];
            rand::thread_rng().fill_bytes(&mut raw);
            Digest::from_bytes(raw)
        }
    }
}
