//! Client-side chunk RPC wrapper
//!
//! Typed calls over a raw transport session: encodes the request record,
//! invokes the numbered method, decodes the response. `fetch_all`
//! reassembles a chunk from partial fetch responses, verifying each slice
//! against the descriptor's slice hashes when provided.

use std::sync::Arc;

use tornet_core::codec::{decode, encode_to_vec};
use tornet_core::digest::{slice_hash, Digest};
use tornet_core::error::{Result, TornetError};
use tornet_core::SLICE_SIZE;

use crate::protocol::{
    FetchRequest, FetchResponse, FetchResult, QueryRequest, QueryResponse, StoreResponse,
    METHOD_FETCH, METHOD_QUERY, METHOD_STORE,
};
use crate::transport::Session;

pub struct ChunkClient {
    session: Arc<dyn Session>,
}

impl ChunkClient {
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Upload raw chunk bytes; the remote id is their digest.
    pub async fn store(&self, bytes: Vec<u8>) -> Result<StoreResponse> {
        let raw = self.session.invoke(METHOD_STORE, bytes).await?;
        decode(&raw)
    }

    /// Fetch one slice of a chunk.
    pub async fn fetch(&self, target: &Digest, length: u32, offset: u32) -> Result<FetchResponse> {
        let req = FetchRequest {
            target: *target,
            length,
            offset,
        };
        let raw = self.session.invoke(METHOD_FETCH, encode_to_vec(&req)).await?;
        decode(&raw)
    }

    /// Presence check plus closer peers.
    pub async fn query(&self, target: &Digest) -> Result<QueryResponse> {
        let req = QueryRequest { target: *target };
        let raw = self.session.invoke(METHOD_QUERY, encode_to_vec(&req)).await?;
        decode(&raw)
    }

    /// Fetch a whole chunk slice-by-slice, optionally verifying each 64 KiB
    /// window against the expected slice hashes.
    pub async fn fetch_all(&self, target: &Digest, slices: Option<&[u32]>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let resp = self
                .fetch(target, SLICE_SIZE as u32, out.len() as u32)
                .await?;
            match FetchResult::from_u8(resp.result)? {
                FetchResult::Ok => {}
                FetchResult::NotFound => {
                    return Err(TornetError::NotFound(format!("chunk {}", target)))
                }
                FetchResult::OutOfCredit => {
                    return Err(TornetError::OutOfCredit {
                        balance: resp.balance,
                        required: SLICE_SIZE as i64,
                    })
                }
            }
            if resp.offset as usize != out.len() {
                return Err(TornetError::Protocol(format!(
                    "fetch returned offset {}, expected {}",
                    resp.offset,
                    out.len()
                )));
            }
            if let Some(expected) = slices {
                let index = out.len() / SLICE_SIZE;
                match expected.get(index) {
                    Some(want) if *want != slice_hash(&resp.data) => {
                        return Err(TornetError::Protocol(format!(
                            "slice {} hash mismatch for chunk {}",
                            index, target
                        )));
                    }
                    None => {
                        return Err(TornetError::Protocol(format!(
                            "chunk {} longer than descriptor: slice {} unexpected",
                            target, index
                        )));
                    }
                    _ => {}
                }
            }
            out.extend_from_slice(&resp.data);
            if out.len() >= resp.total_size as usize {
                return Ok(out);
            }
            if resp.data.is_empty() {
                return Err(TornetError::Protocol(format!(
                    "empty fetch slice before end of chunk {}",
                    target
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChunkService, SessionConfig};
    use crate::sim::SimOverlay;
    use tornet_core::digest::slice_hashes;
    use tornet_storage::ChunkStore;

    async fn client_for_node(data: &[u8]) -> (ChunkClient, Digest) {
        let overlay = SimOverlay::new();
        let id = Digest::compute(b"host node");
        let cache = Arc::new(ChunkStore::open_temporary(0).unwrap());
        let cid = Digest::compute(data);
        cache.store(&cid, data).unwrap();
        overlay.add_node(ChunkService::new(
            id,
            cache,
            overlay.routing(id),
            SessionConfig::default(),
        ));

        let transport = overlay.transport(Digest::compute(b"client node"));
        let session = transport.connect(&id).await.unwrap();
        (ChunkClient::new(session), cid)
    }

    #[tokio::test]
    async fn test_fetch_all_reassembles() {
        let data: Vec<u8> = (0..200_000usize).map(|i| (i % 241) as u8).collect();
        let (client, cid) = client_for_node(&data).await;

        let got = client.fetch_all(&cid, None).await.unwrap();
        assert_eq!(got, data);
    }

    #[tokio::test]
    async fn test_fetch_all_verifies_slices() {
        let data = vec![9u8; 100_000];
        let (client, cid) = client_for_node(&data).await;

        let good = slice_hashes(&data);
        assert!(client.fetch_all(&cid, Some(&good)).await.is_ok());

        let mut bad = good.clone();
        bad[0] ^= 1;
        assert!(matches!(
            client.fetch_all(&cid, Some(&bad)).await,
            Err(TornetError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_all_missing() {
        let (client, _) = client_for_node(b"present").await;
        let missing = Digest::compute(b"missing");
        assert!(matches!(
            client.fetch_all(&missing, None).await,
            Err(TornetError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_presence() {
        let data = vec![3u8; 64];
        let (client, cid) = client_for_node(&data).await;

        assert_eq!(client.query(&cid).await.unwrap().present, 1);
        assert_eq!(
            client
                .query(&Digest::compute(b"absent"))
                .await
                .unwrap()
                .present,
            0
        );
    }
}
