//! Import/export engine
//!
//! The file ⇄ chunk pipeline. Importing memory-maps a file, encrypts it as
//! one CBC stream cut into 1 MiB chunks keyed by the file's own checksum,
//! stores every chunk content-addressed, and wraps the descriptor into an
//! encrypted chunk of its own, identified by the tornet id. Exporting inverts the
//! pipeline and verifies the plaintext checksum before declaring success.
//!
//! Decryption must run in chunk order because the CBC chain spans the whole
//! file; storing per-chunk IVs instead would be a descriptor format change.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use tracing::{debug, info};

use tornet_core::cipher::ChainCipher;
use tornet_core::codec::{self, Decode, Encode, Reader, Sink};
use tornet_core::descriptor::{ChunkEntry, Descriptor};
use tornet_core::digest::{slice_hashes, Digest, DigestSink};
use tornet_core::error::{Result, TornetError};
use tornet_core::{padded_len, CHUNK_SIZE, CIPHER_BLOCK};
use tornet_storage::{ChunkStore, PublishRecord, PublishStore};

/// The chunk engine: both content-addressed stores plus the publish intents.
pub struct ChunkEngine {
    local: Arc<ChunkStore>,
    cache: Arc<ChunkStore>,
    publish: Arc<PublishStore>,
}

impl ChunkEngine {
    /// Open the engine's three databases under `data_dir`.
    pub fn open(data_dir: &Path, cache_budget: u64) -> Result<Self> {
        Ok(Self {
            local: Arc::new(ChunkStore::open_local(data_dir.join("local_db"))?),
            cache: Arc::new(ChunkStore::open_cache(
                data_dir.join("cache_db"),
                cache_budget,
            )?),
            publish: Arc::new(PublishStore::open(data_dir.join("publish_db"))?),
        })
    }

    /// In-memory engine (for testing).
    pub fn open_temporary(cache_budget: u64) -> Result<Self> {
        Ok(Self {
            local: Arc::new(ChunkStore::open_temporary(0)?),
            cache: Arc::new(ChunkStore::open_temporary(cache_budget)?),
            publish: Arc::new(PublishStore::open_temporary()?),
        })
    }

    pub fn local(&self) -> &Arc<ChunkStore> {
        &self.local
    }

    pub fn cache(&self) -> &Arc<ChunkStore> {
        &self.cache
    }

    pub fn publish_store(&self) -> &Arc<PublishStore> {
        &self.publish
    }

    /// Import a file: returns `(tornet_id, checksum)` and writes the
    /// plaintext descriptor sidecar (`<input>.tornet` unless overridden).
    pub fn import(
        &self,
        infile: &Path,
        out_descriptor: Option<&Path>,
    ) -> Result<(Digest, Digest)> {
        let meta = std::fs::metadata(infile).map_err(|_| {
            TornetError::InvalidInput(format!("file {:?} does not exist", infile))
        })?;
        if meta.is_dir() {
            return Err(TornetError::InvalidInput(format!(
                "{:?} is a directory, expected a file",
                infile
            )));
        }
        if !meta.is_file() {
            return Err(TornetError::InvalidInput(format!(
                "{:?} is not a regular file",
                infile
            )));
        }
        if meta.len() == 0 {
            return Err(TornetError::InvalidInput(format!(
                "{:?} is an empty file",
                infile
            )));
        }

        let file = File::open(infile)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let checksum = Digest::compute(&mmap);
        info!(file = ?infile, size = meta.len(), checksum = %checksum, "importing");

        // the whole file encrypts as one CBC stream: no chain reset between
        // chunks
        let mut cipher = ChainCipher::from_digest_key(&checksum);
        let mut chunks = Vec::with_capacity((meta.len() as usize).div_ceil(CHUNK_SIZE));
        for window in mmap.chunks(CHUNK_SIZE) {
            let mut buf = vec![0u8; padded_len(window.len())];
            buf[..window.len()].copy_from_slice(window);
            cipher.encrypt(&mut buf);

            let chunk_id = Digest::compute(&buf);
            let slices = slice_hashes(&buf);
            self.local.store(&chunk_id, &buf)?;
            debug!(chunk_id = %chunk_id, size = window.len(), "stored chunk");
            chunks.push(ChunkEntry {
                id: chunk_id,
                size: window.len() as u64,
                slices,
            });
        }

        let descriptor = Descriptor {
            name: infile
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: meta.len(),
            checksum,
            chunks,
        };

        // descriptor blob: leading checksum lets decryption be validated
        // before the body is parsed
        let mut blob = Vec::new();
        checksum.encode(&mut blob);
        descriptor.encode(&mut blob);
        blob.resize(padded_len(blob.len()), 0);
        cipher.reset_chain();
        cipher.encrypt(&mut blob);

        let tornet_id = Digest::compute(&blob);
        self.local.store(&tornet_id, &blob)?;

        let sidecar = match out_descriptor {
            Some(path) => path.to_path_buf(),
            None => {
                let mut name = infile.as_os_str().to_os_string();
                name.push(".tornet");
                PathBuf::from(name)
            }
        };
        std::fs::write(&sidecar, codec::encode_to_vec(&descriptor))?;

        info!(tornet_id = %tornet_id, chunks = descriptor.chunks.len(), "import complete");
        Ok((tornet_id, checksum))
    }

    /// Export a file by tornet id and checksum. A checksum mismatch deletes
    /// the output. Returns the written path.
    pub fn export(
        &self,
        tornet_id: &Digest,
        checksum: &Digest,
        out_path: Option<&Path>,
    ) -> Result<PathBuf> {
        let descriptor = self.fetch_descriptor(tornet_id, checksum)?;
        let out = match out_path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(&descriptor.name),
        };

        let result = self.write_plaintext(&descriptor, checksum, &out);
        if result.is_err() {
            let _ = std::fs::remove_file(&out);
        }
        result?;
        info!(tornet_id = %tornet_id, out = ?out, "export complete");
        Ok(out)
    }

    fn write_plaintext(
        &self,
        descriptor: &Descriptor,
        checksum: &Digest,
        out: &Path,
    ) -> Result<()> {
        let mut writer = BufWriter::new(File::create(out)?);
        let mut cipher = ChainCipher::from_digest_key(checksum);
        let mut hash = DigestSink::new();

        // chunks decrypt in order: the chain continues across them
        for entry in &descriptor.chunks {
            let mut buf = self.fetch_chunk(&entry.id)?.to_vec();
            if buf.len() % CIPHER_BLOCK != 0 || (entry.size as usize) > buf.len() {
                return Err(TornetError::Protocol(format!(
                    "chunk {} has invalid stored length {}",
                    entry.id,
                    buf.len()
                )));
            }
            cipher.decrypt(&mut buf);
            let plain = &buf[..entry.size as usize];
            writer.write_all(plain)?;
            hash.put(plain);
        }
        writer.flush()?;

        let actual = hash.finish();
        if actual != *checksum {
            return Err(TornetError::ChecksumMismatch {
                expected: *checksum,
                actual,
            });
        }
        Ok(())
    }

    /// Fetch and decode a descriptor without touching its chunks. The
    /// leading digest of the decrypted blob validates the key before the
    /// body is parsed.
    pub fn fetch_descriptor(&self, tornet_id: &Digest, checksum: &Digest) -> Result<Descriptor> {
        let mut buf = self.fetch_chunk(tornet_id)?.to_vec();

        let mut cipher = ChainCipher::from_digest_key(checksum);
        cipher.decrypt(&mut buf);

        let mut reader = Reader::new(&buf);
        let lead = Digest::decode(&mut reader)?;
        if lead != *checksum {
            return Err(TornetError::ChecksumMismatch {
                expected: *checksum,
                actual: lead,
            });
        }
        let descriptor = Descriptor::decode(&mut reader)?;
        if descriptor.checksum != *checksum {
            return Err(TornetError::ChecksumMismatch {
                expected: *checksum,
                actual: descriptor.checksum,
            });
        }
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Fetch chunk bytes from the local store, falling back to the cache.
    pub fn fetch_chunk(&self, id: &Digest) -> Result<Bytes> {
        if let Some(bytes) = self.local.fetch(id)? {
            return Ok(bytes);
        }
        if let Some(bytes) = self.cache.fetch(id)? {
            return Ok(bytes);
        }
        Err(TornetError::NotFound(format!("chunk {}", id)))
    }

    /// Create one publish record per chunk plus one for the descriptor
    /// itself, all due immediately. Idempotent; an existing record keeps its
    /// observed count. The chunk group is remembered so `unpublish` works
    /// from the tornet id alone.
    pub fn publish(&self, tornet_id: &Digest, checksum: &Digest, replicas: u16) -> Result<()> {
        let descriptor = self.fetch_descriptor(tornet_id, checksum)?;
        let ids: Vec<Digest> = descriptor
            .chunks
            .iter()
            .map(|c| c.id)
            .chain([*tornet_id])
            .collect();
        for id in &ids {
            let mut rec = self.publish.fetch(id)?.unwrap_or_default();
            rec.desired_replicas = replicas;
            rec.next_check_us = 0;
            self.publish.store(id, &rec)?;
        }
        self.publish.store_group(tornet_id, &ids)?;
        info!(tornet_id = %tornet_id, replicas, records = ids.len(), "published");
        Ok(())
    }

    /// Drop the publish records created by `publish`.
    pub fn unpublish(&self, tornet_id: &Digest) -> Result<()> {
        let ids = self
            .publish
            .remove_group(tornet_id)?
            .ok_or_else(|| TornetError::NotFound(format!("publish group {}", tornet_id)))?;
        for id in &ids {
            self.publish.remove(id)?;
        }
        info!(tornet_id = %tornet_id, "unpublished");
        Ok(())
    }

    /// Seed the engine's cache with a raw encrypted chunk fetched from a
    /// peer; verifies content addressing first.
    pub fn store_fetched_chunk(&self, id: &Digest, bytes: &[u8]) -> Result<()> {
        let actual = Digest::compute(bytes);
        if actual != *id {
            return Err(TornetError::ChecksumMismatch {
                expected: *id,
                actual,
            });
        }
        self.cache.store(id, bytes)
    }

    /// One publish record, if present.
    pub fn publish_record(&self, id: &Digest) -> Result<Option<PublishRecord>> {
        self.publish.fetch(id)
    }
}
