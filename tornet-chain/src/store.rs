//! Chain persistence
//!
//! Sled-backed storage for the name chain: full block records by digest, a
//! `block_num → block_id` index for the main chain, and transaction bodies
//! by digest. Bodies older than the retention window are purged; block
//! records are retained indefinitely.

use std::path::Path;

use tracing::debug;

use tornet_core::codec;
use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};

use crate::block::NameBlock;
use crate::transaction::NameTrx;

pub struct ChainStore {
    db: sled::Db,
    blocks: sled::Tree,
    bodies: sled::Tree,
    main: sled::Tree,
}

impl ChainStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = ?path.as_ref(), "opening chain store");
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
        let blocks = db.open_tree("blocks").map_err(storage_err)?;
        let bodies = db.open_tree("bodies").map_err(storage_err)?;
        let main = db.open_tree("main").map_err(storage_err)?;
        Ok(Self {
            db,
            blocks,
            bodies,
            main,
        })
    }

    pub fn put_block(&self, block: &NameBlock) -> Result<()> {
        self.blocks
            .insert(block.id().as_bytes(), codec::encode_to_vec(block))
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn block(&self, id: &Digest) -> Result<Option<NameBlock>> {
        match self.blocks.get(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_body(&self, trx: &NameTrx) -> Result<()> {
        self.bodies
            .insert(trx.id().as_bytes(), codec::encode_to_vec(trx))
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn body(&self, id: &Digest) -> Result<Option<NameTrx>> {
        match self.bodies.get(id.as_bytes()).map_err(storage_err)? {
            Some(raw) => Ok(Some(codec::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Record `id` as the main-chain block at height `num`.
    pub fn set_main(&self, num: u64, id: &Digest) -> Result<()> {
        self.main
            .insert(num.to_be_bytes(), id.as_bytes().as_slice())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn main_id(&self, num: u64) -> Result<Option<Digest>> {
        match self.main.get(num.to_be_bytes()).map_err(storage_err)? {
            Some(raw) => Ok(Some(Digest::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Height of the stored main chain, if any.
    pub fn main_height(&self) -> Result<Option<u64>> {
        match self.main.last().map_err(storage_err)? {
            Some((key, _)) => {
                let mut num = [0u8; 8];
                num.copy_from_slice(&key);
                Ok(Some(u64::from_be_bytes(num)))
            }
            None => Ok(None),
        }
    }

    /// Drop main-chain index entries above `num` (reorganisation).
    pub fn truncate_main_above(&self, num: u64) -> Result<()> {
        while let Some(height) = self.main_height()? {
            if height <= num {
                break;
            }
            self.main
                .remove(height.to_be_bytes())
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Purge transaction bodies of main-chain blocks older than `cutoff_us`,
    /// keeping the block records themselves.
    pub fn purge_bodies_before(&self, cutoff_us: u64) -> Result<usize> {
        let mut purged = 0;
        for item in self.main.iter() {
            let (_, id_raw) = item.map_err(storage_err)?;
            let id = Digest::from_slice(&id_raw)?;
            let block = match self.block(&id)? {
                Some(block) => block,
                None => continue,
            };
            if block.utc_us >= cutoff_us {
                break;
            }
            for trx_id in block.transactions.iter().chain([&block.gen_transaction]) {
                if self
                    .bodies
                    .remove(trx_id.as_bytes())
                    .map_err(storage_err)?
                    .is_some()
                {
                    purged += 1;
                }
            }
        }
        if purged > 0 {
            debug!(purged, cutoff_us, "purged expired transaction bodies");
        }
        Ok(purged)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(err: sled::Error) -> TornetError {
    TornetError::Storage(err.to_string())
}
