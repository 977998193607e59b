//! Chunk RPC service
//!
//! One `ChunkService` per node; one `ChunkSession` per incoming connection.
//! A session serves chunks out of the *cache* store (chunks held on behalf
//! of other peers) and bills a per-peer balance: storing earns credit,
//! fetching spends it. Methods dispatch through a table built once per
//! session type, indexed by registration order.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use tornet_core::codec::{decode, encode_to_vec};
use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};
use tornet_storage::ChunkStore;

use crate::protocol::{
    FetchRequest, FetchResponse, FetchResult, QueryRequest, QueryResponse, StoreResponse,
    StoreResult, METHOD_FETCH, METHOD_QUERY, METHOD_STORE,
};
use crate::routing::Routing;

/// Tunables for the serving side of the chunk protocol.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Credit granted to a fresh session before it has stored anything.
    pub initial_balance: i64,

    /// Largest data slice returned by a single fetch.
    pub max_fetch_slice: u32,

    /// Suggested re-query delay reported to clients, in seconds.
    pub query_interval: u32,

    /// Admission horizon: reject a store when more than this many known
    /// peers sit strictly closer to the chunk id than this node.
    /// `usize::MAX` admits everything (the default policy).
    pub admission_horizon: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_balance: 4 * 1024 * 1024,
            max_fetch_slice: 64 * 1024,
            query_interval: 60,
            admission_horizon: usize::MAX,
        }
    }
}

/// Per-node chunk service state shared by all sessions.
pub struct ChunkService {
    node_id: Digest,
    cache: Arc<ChunkStore>,
    routing: Arc<dyn Routing>,
    config: SessionConfig,
}

impl ChunkService {
    pub fn new(
        node_id: Digest,
        cache: Arc<ChunkStore>,
        routing: Arc<dyn Routing>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            cache,
            routing,
            config,
        })
    }

    pub fn node_id(&self) -> Digest {
        self.node_id
    }

    /// Open a session for an incoming connection from `peer`.
    pub fn open_session(self: &Arc<Self>, peer: Digest) -> ChunkSession {
        ChunkSession {
            service: Arc::clone(self),
            peer,
            balance: Mutex::new(self.config.initial_balance),
        }
    }

    /// Admission rule for incoming stores. Permissive by default; the
    /// horizon narrows it toward "only chunks near my id".
    fn admit(&self, id: &Digest) -> bool {
        if self.config.admission_horizon == usize::MAX {
            return true;
        }
        let my_distance = self.node_id.distance(id);
        let closer = self
            .routing
            .closer_peers(id, 32)
            .iter()
            .filter(|peer| peer.distance(id) < my_distance)
            .count();
        closer <= self.config.admission_horizon
    }
}

type Handler = fn(&ChunkSession, &[u8]) -> Result<Vec<u8>>;

/// Registration order defines the wire method numbers.
const METHOD_TABLE: [Handler; 3] = [
    ChunkSession::handle_store,
    ChunkSession::handle_fetch,
    ChunkSession::handle_query,
];

/// Per-connection session state.
pub struct ChunkSession {
    service: Arc<ChunkService>,
    peer: Digest,
    balance: Mutex<i64>,
}

impl ChunkSession {
    pub fn peer(&self) -> Digest {
        self.peer
    }

    pub fn balance(&self) -> i64 {
        *self.balance.lock()
    }

    /// Route an invocation to its handler.
    pub fn dispatch(&self, method: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let handler = METHOD_TABLE
            .get(method as usize)
            .ok_or_else(|| TornetError::Protocol(format!("unknown method {}", method)))?;
        handler(self, payload)
    }

    /// `store`: the payload is the raw chunk; its digest is the id.
    fn handle_store(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let id = Digest::compute(payload);
        debug!(peer = %self.peer, chunk_id = %id, size = payload.len(), "store request");

        let result = if !self.service.admit(&id) {
            StoreResult::Rejected
        } else {
            match self.service.cache.store(&id, payload) {
                Ok(()) => {
                    *self.balance.lock() += payload.len() as i64;
                    StoreResult::Accepted
                }
                Err(TornetError::Capacity(_)) => StoreResult::Full,
                Err(e) => return Err(e),
            }
        };

        Ok(encode_to_vec(&StoreResponse {
            result: result as u8,
        }))
    }

    /// `fetch`: returns a slice of the chunk and debits the balance.
    fn handle_fetch(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let req: FetchRequest = decode(payload)?;
        trace!(peer = %self.peer, target = %req.target, offset = req.offset, "fetch request");

        let base = FetchResponse {
            result: FetchResult::NotFound as u8,
            offset: req.offset,
            total_size: 0,
            data: Vec::new(),
            balance: self.balance(),
            query_interval: self.service.config.query_interval,
            deadend_count: 0,
        };

        let chunk = match self.service.cache.fetch(&req.target)? {
            Some(chunk) => chunk,
            None => return Ok(encode_to_vec(&base)),
        };

        let total = chunk.len() as u32;
        let start = req.offset.min(total) as usize;
        let want = req.length.min(self.service.config.max_fetch_slice) as usize;
        let end = (start + want).min(total as usize);
        let cost = (end - start) as i64;

        let mut balance = self.balance.lock();
        if *balance - cost < 0 {
            return Ok(encode_to_vec(&FetchResponse {
                result: FetchResult::OutOfCredit as u8,
                total_size: total,
                balance: *balance,
                ..base
            }));
        }
        *balance -= cost;

        Ok(encode_to_vec(&FetchResponse {
            result: FetchResult::Ok as u8,
            offset: start as u32,
            total_size: total,
            data: chunk[start..end].to_vec(),
            balance: *balance,
            query_interval: self.service.config.query_interval,
            deadend_count: 0,
        }))
    }

    /// `query`: presence check plus closer peers from the local table.
    fn handle_query(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let req: QueryRequest = decode(payload)?;
        let present = self.service.cache.exists(&req.target)?;
        let closer_peers = self
            .service
            .routing
            .closer_peers(&req.target, 8)
            .into_iter()
            .filter(|p| *p != self.service.node_id)
            .collect();

        Ok(encode_to_vec(&QueryResponse {
            present: present as u8,
            closer_peers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOverlay;

    fn service_with_budget(budget: u64) -> (Arc<ChunkService>, Arc<ChunkStore>) {
        let overlay = SimOverlay::new();
        let cache = Arc::new(ChunkStore::open_temporary(budget).unwrap());
        let node_id = Digest::compute(b"server node");
        let routing = overlay.routing(node_id);
        let svc = ChunkService::new(node_id, Arc::clone(&cache), routing, SessionConfig::default());
        (svc, cache)
    }

    #[test]
    fn test_store_then_fetch() {
        let (svc, _cache) = service_with_budget(0);
        let session = svc.open_session(Digest::compute(b"client"));

        let chunk = vec![0xabu8; 1024];
        let resp: StoreResponse =
            decode(&session.dispatch(METHOD_STORE, &chunk).unwrap()).unwrap();
        assert_eq!(StoreResult::from_u8(resp.result).unwrap(), StoreResult::Accepted);

        let req = FetchRequest {
            target: Digest::compute(&chunk),
            length: 4096,
            offset: 0,
        };
        let resp: FetchResponse = decode(
            &session
                .dispatch(METHOD_FETCH, &encode_to_vec(&req))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(FetchResult::from_u8(resp.result).unwrap(), FetchResult::Ok);
        assert_eq!(resp.total_size, 1024);
        assert_eq!(resp.data, chunk);
    }

    #[test]
    fn test_fetch_missing_chunk() {
        let (svc, _cache) = service_with_budget(0);
        let session = svc.open_session(Digest::compute(b"client"));

        let req = FetchRequest {
            target: Digest::compute(b"nope"),
            length: 64,
            offset: 0,
        };
        let resp: FetchResponse = decode(
            &session
                .dispatch(METHOD_FETCH, &encode_to_vec(&req))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            FetchResult::from_u8(resp.result).unwrap(),
            FetchResult::NotFound
        );
    }

    #[test]
    fn test_partial_fetch_window() {
        let (svc, _cache) = service_with_budget(0);
        let session = svc.open_session(Digest::compute(b"client"));

        let chunk: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        session.dispatch(METHOD_STORE, &chunk).unwrap();

        let req = FetchRequest {
            target: Digest::compute(&chunk),
            length: u32::MAX,
            offset: 100,
        };
        let resp: FetchResponse = decode(
            &session
                .dispatch(METHOD_FETCH, &encode_to_vec(&req))
                .unwrap(),
        )
        .unwrap();
        // slice capped at max_fetch_slice
        assert_eq!(resp.offset, 100);
        assert_eq!(resp.data.len(), 64 * 1024);
        assert_eq!(resp.data[..16], chunk[100..116]);
    }

    #[test]
    fn test_balance_accounting() {
        let (svc, _cache) = service_with_budget(0);
        let session = svc.open_session(Digest::compute(b"client"));
        let initial = session.balance();

        let chunk = vec![1u8; 1000];
        session.dispatch(METHOD_STORE, &chunk).unwrap();
        assert_eq!(session.balance(), initial + 1000);

        let req = FetchRequest {
            target: Digest::compute(&chunk),
            length: 1000,
            offset: 0,
        };
        session
            .dispatch(METHOD_FETCH, &encode_to_vec(&req))
            .unwrap();
        assert_eq!(session.balance(), initial);
    }

    #[test]
    fn test_out_of_credit() {
        let overlay = SimOverlay::new();
        let cache = Arc::new(ChunkStore::open_temporary(0).unwrap());
        let node_id = Digest::compute(b"server");
        let svc = ChunkService::new(
            node_id,
            Arc::clone(&cache),
            overlay.routing(node_id),
            SessionConfig {
                initial_balance: 10,
                ..Default::default()
            },
        );
        let session = svc.open_session(Digest::compute(b"client"));

        let chunk = vec![2u8; 100];
        let cid = Digest::compute(&chunk);
        cache.store(&cid, &chunk).unwrap();

        let req = FetchRequest {
            target: cid,
            length: 100,
            offset: 0,
        };
        let resp: FetchResponse = decode(
            &session
                .dispatch(METHOD_FETCH, &encode_to_vec(&req))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            FetchResult::from_u8(resp.result).unwrap(),
            FetchResult::OutOfCredit
        );
        assert_eq!(resp.balance, 10);
        assert!(resp.data.is_empty());
    }

    #[test]
    fn test_store_full_cache() {
        let (svc, _cache) = service_with_budget(64);
        let session = svc.open_session(Digest::compute(b"client"));

        let resp: StoreResponse = decode(
            &session
                .dispatch(METHOD_STORE, &vec![0u8; 128])
                .unwrap(),
        )
        .unwrap();
        assert_eq!(StoreResult::from_u8(resp.result).unwrap(), StoreResult::Full);
    }

    #[test]
    fn test_unknown_method() {
        let (svc, _cache) = service_with_budget(0);
        let session = svc.open_session(Digest::compute(b"client"));
        assert!(matches!(
            session.dispatch(7, &[]),
            Err(TornetError::Protocol(_))
        ));
    }
}
