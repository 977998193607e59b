//! Remote chunk retrieval
//!
//! Pulls chunks the node does not hold from hosting peers: search for
//! hosts, fetch slice-by-slice with per-slice hash verification, seed the
//! cache. A peer that serves corrupt data is blacklisted for the
//! configured cool-down and the next host is tried.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use tornet_core::descriptor::Descriptor;
use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};
use tornet_network::{Blacklist, ChunkClient, ChunkSearch, Routing, Transport};

use crate::engine::ChunkEngine;

pub struct Retriever {
    engine: Arc<ChunkEngine>,
    routing: Arc<dyn Routing>,
    transport: Arc<dyn Transport>,
    blacklist: Arc<Blacklist>,
}

impl Retriever {
    pub fn new(
        engine: Arc<ChunkEngine>,
        routing: Arc<dyn Routing>,
        transport: Arc<dyn Transport>,
        blacklist: Arc<Blacklist>,
    ) -> Self {
        Self {
            engine,
            routing,
            transport,
            blacklist,
        }
    }

    /// Fetch one chunk, preferring the node's own stores. Remote bytes are
    /// verified against the chunk id (and slice hashes when given) before
    /// they land in the cache.
    pub async fn fetch_chunk(&self, id: &Digest, slices: Option<&[u32]>) -> Result<Bytes> {
        if let Ok(bytes) = self.engine.fetch_chunk(id) {
            return Ok(bytes);
        }

        let mut search = ChunkSearch::new(
            Arc::clone(&self.routing),
            Arc::clone(&self.transport),
            Arc::clone(&self.blacklist),
            *id,
            1,
            1,
            true,
            Arc::new(AtomicBool::new(false)),
        );
        search.start();
        search.wait().await?;

        for peer in search.hosting_nodes().values() {
            if self.blacklist.contains(peer) {
                continue;
            }
            let session = match self.transport.connect(peer).await {
                Ok(session) => session,
                Err(e) => {
                    debug!(peer = %peer, error = %e, "host unreachable");
                    continue;
                }
            };
            match ChunkClient::new(session).fetch_all(id, slices).await {
                Ok(bytes) => match self.engine.store_fetched_chunk(id, &bytes) {
                    Ok(()) => return Ok(Bytes::from(bytes)),
                    Err(e) if e.is_integrity() => {
                        warn!(peer = %peer, chunk_id = %id, "peer served corrupt chunk");
                        self.blacklist.insert(*peer);
                    }
                    Err(e) => return Err(e),
                },
                // a slice hash mismatch surfaces as a protocol error
                Err(TornetError::Protocol(detail)) => {
                    warn!(peer = %peer, chunk_id = %id, detail = %detail, "peer served corrupt slice");
                    self.blacklist.insert(*peer);
                }
                Err(e) => {
                    debug!(peer = %peer, chunk_id = %id, error = %e, "fetch failed");
                }
            }
        }
        Err(TornetError::NotFound(format!("chunk {}", id)))
    }

    /// Pull a whole file into the node: the descriptor chunk first, then
    /// every data chunk it lists. Returns the decoded descriptor.
    pub async fn fetch_file(&self, tornet_id: &Digest, checksum: &Digest) -> Result<Descriptor> {
        self.fetch_chunk(tornet_id, None).await?;
        let descriptor = self.engine.fetch_descriptor(tornet_id, checksum)?;
        for entry in &descriptor.chunks {
            self.fetch_chunk(&entry.id, Some(&entry.slices)).await?;
        }
        Ok(descriptor)
    }
}
