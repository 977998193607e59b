//! Content-addressed chunk store
//!
//! Maps chunk digest → raw encrypted bytes plus an access-metadata record.
//! A node runs two instances: the *local* store for chunks it originated
//! (unbounded) and the *cache* store for chunks held on behalf of other
//! peers (LRU-evicted against a byte budget).

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

use tornet_core::codec::{Decode, Encode, Reader, Sink};
use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};
use tornet_core::{codec, now_us};

/// Access metadata kept per stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMeta {
    pub size: u64,
    pub first_seen_us: u64,
    pub last_access_us: u64,
    pub access_count: u32,
}

impl Encode for ChunkMeta {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u64(self.size);
        out.put_u64(self.first_seen_us);
        out.put_u64(self.last_access_us);
        out.put_u32(self.access_count);
    }
}

impl Decode for ChunkMeta {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            size: r.u64()?,
            first_seen_us: r.u64()?,
            last_access_us: r.u64()?,
            access_count: r.u32()?,
        })
    }
}

/// Content-addressed blob store.
pub struct ChunkStore {
    db: sled::Db,
    chunks: sled::Tree,
    meta: sled::Tree,

    /// Byte budget; 0 means unbounded (local mode).
    budget: u64,
    bytes_used: AtomicU64,

    /// `(last_access_us, id)` index for eviction; maintained only when
    /// a budget is set.
    lru: Mutex<BTreeSet<(u64, Digest)>>,
}

impl ChunkStore {
    /// Open an unbounded store for node-originated chunks.
    pub fn open_local<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, 0)
    }

    /// Open a budget-bounded store for chunks held for other peers.
    pub fn open_cache<P: AsRef<Path>>(path: P, budget_bytes: u64) -> Result<Self> {
        Self::open(path, budget_bytes)
    }

    /// Open an in-memory store (for testing).
    pub fn open_temporary(budget_bytes: u64) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_db(db, budget_bytes)
    }

    fn open<P: AsRef<Path>>(path: P, budget: u64) -> Result<Self> {
        debug!(path = ?path.as_ref(), budget, "opening chunk store");
        let db = sled::open(path.as_ref()).map_err(storage_err)?;
        Self::from_db(db, budget)
    }

    fn from_db(db: sled::Db, budget: u64) -> Result<Self> {
        let chunks = db.open_tree("chunks").map_err(storage_err)?;
        let meta = db.open_tree("meta").map_err(storage_err)?;

        let mut used = 0u64;
        let mut lru = BTreeSet::new();
        for item in meta.iter() {
            let (key, value) = item.map_err(storage_err)?;
            let id = Digest::from_slice(&key)?;
            let m: ChunkMeta = codec::decode(&value)?;
            used += m.size;
            if budget > 0 {
                lru.insert((m.last_access_us, id));
            }
        }

        Ok(Self {
            db,
            chunks,
            meta,
            budget,
            bytes_used: AtomicU64::new(used),
            lru: Mutex::new(lru),
        })
    }

    /// Store a chunk under its digest. Idempotent: re-storing an existing
    /// chunk only refreshes its access metadata.
    pub fn store(&self, id: &Digest, bytes: &[u8]) -> Result<()> {
        if self.exists(id)? {
            self.touch(id)?;
            return Ok(());
        }

        let len = bytes.len() as u64;
        if self.budget > 0 {
            if len > self.budget {
                return Err(TornetError::Capacity(format!(
                    "chunk of {} bytes exceeds cache budget of {}",
                    len, self.budget
                )));
            }
            while self.bytes_used.load(Ordering::SeqCst) + len > self.budget {
                if !self.evict_one()? {
                    return Err(TornetError::Capacity(
                        "cache budget exhausted with nothing evictable".to_string(),
                    ));
                }
            }
        }

        let now = now_us();
        let m = ChunkMeta {
            size: len,
            first_seen_us: now,
            last_access_us: now,
            access_count: 0,
        };

        self.chunks
            .insert(id.as_bytes(), bytes)
            .map_err(storage_err)?;
        self.put_meta(id, &m)?;
        self.bytes_used.fetch_add(len, Ordering::SeqCst);
        if self.budget > 0 {
            self.lru.lock().insert((now, *id));
        }
        trace!(chunk_id = %id, size = len, "stored chunk");
        Ok(())
    }

    /// Fetch a chunk's bytes, refreshing its access metadata.
    pub fn fetch(&self, id: &Digest) -> Result<Option<Bytes>> {
        match self.chunks.get(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => {
                self.touch(id)?;
                Ok(Some(Bytes::from(raw.to_vec())))
            }
            None => Ok(None),
        }
    }

    /// Fetch a chunk's metadata; `touch` also refreshes last access.
    pub fn fetch_meta(&self, id: &Digest, touch: bool) -> Result<Option<ChunkMeta>> {
        let raw = match self.meta.get(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let m: ChunkMeta = codec::decode(&raw)?;
        if touch {
            self.touch(id)?;
        }
        Ok(Some(m))
    }

    pub fn exists(&self, id: &Digest) -> Result<bool> {
        self.chunks.contains_key(id.as_bytes()).map_err(storage_err)
    }

    /// Remove a chunk; returns whether it was present.
    pub fn delete(&self, id: &Digest) -> Result<bool> {
        let removed = self.chunks.remove(id.as_bytes()).map_err(storage_err)?;
        if removed.is_none() {
            return Ok(false);
        }
        if let Some(raw) = self.meta.remove(id.as_bytes()).map_err(storage_err)? {
            let m: ChunkMeta = codec::decode(&raw)?;
            self.bytes_used.fetch_sub(m.size, Ordering::SeqCst);
            if self.budget > 0 {
                self.lru.lock().remove(&(m.last_access_us, *id));
            }
        }
        Ok(true)
    }

    /// Number of chunks held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total bytes of chunk data held.
    pub fn bytes_used(&self) -> u64 {
        self.bytes_used.load(Ordering::SeqCst)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    fn put_meta(&self, id: &Digest, m: &ChunkMeta) -> Result<()> {
        self.meta
            .insert(id.as_bytes(), codec::encode_to_vec(m))
            .map_err(storage_err)?;
        Ok(())
    }

    fn touch(&self, id: &Digest) -> Result<()> {
        let raw = match self.meta.get(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => raw,
            None => return Ok(()),
        };
        let mut m: ChunkMeta = codec::decode(&raw)?;
        let old_access = m.last_access_us;
        m.last_access_us = now_us();
        m.access_count += 1;
        self.put_meta(id, &m)?;
        if self.budget > 0 {
            let mut lru = self.lru.lock();
            lru.remove(&(old_access, *id));
            lru.insert((m.last_access_us, *id));
        }
        Ok(())
    }

    /// Evict the least-recently-accessed chunk. Returns false when the
    /// store is already empty.
    fn evict_one(&self) -> Result<bool> {
        let victim = {
            let lru = self.lru.lock();
            lru.iter().next().copied()
        };
        match victim {
            Some((_, id)) => {
                warn!(chunk_id = %id, "evicting chunk from cache");
                self.delete(&id)
            }
            None => Ok(false),
        }
    }
}

fn storage_err(err: sled::Error) -> TornetError {
    TornetError::Storage(err.to_string())
}
