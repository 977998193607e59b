//! Routing seam
//!
//! The Kademlia routing layer is an external collaborator; this trait is the
//! surface the rest of the node depends on. `lookup` runs the iterative
//! network search; `closer_peers` answers from the local routing table only
//! (used by the `query` RPC handler).

use async_trait::async_trait;

use tornet_core::digest::Digest;

#[async_trait]
pub trait Routing: Send + Sync {
    /// This node's overlay id.
    fn self_id(&self) -> Digest;

    /// Iterative lookup: up to `k` reachable peer ids ordered by XOR
    /// distance to `target`, with `alpha` parallel probes per round.
    async fn lookup(&self, target: &Digest, k: usize, alpha: usize) -> Vec<Digest>;

    /// Peers from the local table closer to `target`, without network I/O.
    fn closer_peers(&self, target: &Digest, k: usize) -> Vec<Digest>;
}
