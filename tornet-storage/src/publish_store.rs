//! Publish-intent store
//!
//! Persistent map chunk digest → publish record. The publish loop drains
//! records in `next_check_us` order, so an in-memory ordered index over
//! `(next_check_us, id)` is rebuilt on open and kept in lockstep with the
//! sled tree; `fetch_next` is O(log N).

use std::collections::BTreeSet;
use std::path::Path;

use parking_lot::Mutex;
use tracing::debug;

use tornet_core::codec::{Decode, Encode, Reader, Sink};
use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};
use tornet_core::codec;

/// The intent to keep one chunk replicated at a desired level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRecord {
    pub desired_replicas: u16,
    pub next_check_us: u64,
    pub observed_replicas: u16,
}

impl Encode for PublishRecord {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put_u16(self.desired_replicas);
        out.put_u64(self.next_check_us);
        out.put_u16(self.observed_replicas);
    }
}

impl Decode for PublishRecord {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            desired_replicas: r.u16()?,
            next_check_us: r.u64()?,
            observed_replicas: r.u16()?,
        })
    }
}

/// Persistent set of publish intents keyed by chunk digest.
///
/// A second tree remembers which chunk ids each published descriptor
/// expanded to, so unpublishing needs only the tornet id.
pub struct PublishStore {
    db: sled::Db,
    records: sled::Tree,
    groups: sled::Tree,
    index: Mutex<BTreeSet<(u64, Digest)>>,
}

impl PublishStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = ?path.as_ref(), "opening publish store");
        let db = sled::open(path.as_ref()).map_err(storage_err)?;
        Self::from_db(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(storage_err)?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        let records = db.open_tree("publish").map_err(storage_err)?;
        let groups = db.open_tree("groups").map_err(storage_err)?;
        let mut index = BTreeSet::new();
        for item in records.iter() {
            let (key, value) = item.map_err(storage_err)?;
            let id = Digest::from_slice(&key)?;
            let rec: PublishRecord = codec::decode(&value)?;
            index.insert((rec.next_check_us, id));
        }
        Ok(Self {
            db,
            records,
            groups,
            index: Mutex::new(index),
        })
    }

    /// Insert or overwrite the record for a chunk.
    pub fn store(&self, id: &Digest, rec: &PublishRecord) -> Result<()> {
        let mut index = self.index.lock();
        if let Some(old) = self.get(id)? {
            index.remove(&(old.next_check_us, *id));
        }
        self.records
            .insert(id.as_bytes(), codec::encode_to_vec(rec))
            .map_err(storage_err)?;
        index.insert((rec.next_check_us, *id));
        Ok(())
    }

    pub fn fetch(&self, id: &Digest) -> Result<Option<PublishRecord>> {
        self.get(id)
    }

    /// The record with the smallest `next_check_us`, if any.
    pub fn fetch_next(&self) -> Result<Option<(Digest, PublishRecord)>> {
        let next = {
            let index = self.index.lock();
            index.iter().next().copied()
        };
        match next {
            Some((_, id)) => Ok(self.get(&id)?.map(|rec| (id, rec))),
            None => Ok(None),
        }
    }

    /// Remove a record; returns whether it was present.
    pub fn remove(&self, id: &Digest) -> Result<bool> {
        let mut index = self.index.lock();
        match self.records.remove(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => {
                let rec: PublishRecord = codec::decode(&raw)?;
                index.remove(&(rec.next_check_us, *id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remember which chunk ids a published descriptor expanded to.
    pub fn store_group(&self, tornet_id: &Digest, chunk_ids: &[Digest]) -> Result<()> {
        self.groups
            .insert(
                tornet_id.as_bytes(),
                codec::encode_to_vec(&chunk_ids.to_vec()),
            )
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn fetch_group(&self, tornet_id: &Digest) -> Result<Option<Vec<Digest>>> {
        match self.groups.get(tornet_id.as_bytes()).map_err(storage_err)? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn remove_group(&self, tornet_id: &Digest) -> Result<Option<Vec<Digest>>> {
        match self
            .groups
            .remove(tornet_id.as_bytes())
            .map_err(storage_err)?
        {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    fn get(&self, id: &Digest) -> Result<Option<PublishRecord>> {
        match self.records.get(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }
}

fn storage_err(err: sled::Error) -> TornetError {
    TornetError::Storage(err.to_string())
}
