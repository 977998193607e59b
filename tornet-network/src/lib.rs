//! Tornet Network
//!
//! The overlay-facing layer of a tornet node:
//! - Wire message records for the chunk RPC protocol
//! - `ChunkService`/`ChunkSession`: the per-connection store/fetch/query
//!   service with per-peer balance accounting
//! - `ChunkSearch`: DHT lookup wrapper that resolves hosting and near nodes
//!   for a target digest
//! - `Routing`/`Transport` traits (the DHT and RPC transport are external
//!   collaborators) plus an in-memory simulation used by tests and the
//!   development overlay
//! - Peer blacklist with cool-down

pub mod blacklist;
pub mod client;
pub mod protocol;
pub mod routing;
pub mod search;
pub mod session;
pub mod sim;
pub mod transport;

pub use blacklist::Blacklist;
pub use client::ChunkClient;
pub use protocol::{
    FetchRequest, FetchResponse, FetchResult, QueryRequest, QueryResponse, StoreResponse,
    StoreResult, METHOD_FETCH, METHOD_QUERY, METHOD_STORE,
};
pub use routing::Routing;
pub use search::ChunkSearch;
pub use session::{ChunkService, ChunkSession, SessionConfig};
pub use sim::{SimOverlay, SimRouting, SimTransport};
pub use transport::{Session, Transport};
