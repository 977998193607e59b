//! Tornet Storage
//!
//! Persistent stores backing a tornet node:
//! - `ChunkStore`: content-addressed blob store, opened in *local* mode
//!   (user data, never evicts) or *cache* mode (peer data, LRU-bounded)
//! - `PublishStore`: the set of publish intents the publish loop drains
//!
//! Both are sled-backed; record values use the canonical codec because the
//! on-disk format is part of the protocol surface.

pub mod chunk_store;
pub mod publish_store;

pub use chunk_store::{ChunkMeta, ChunkStore};
pub use publish_store::{PublishRecord, PublishStore};
