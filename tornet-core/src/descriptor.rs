//! Tornet descriptors
//!
//! A descriptor is the manifest of an imported file: its name, size, plaintext
//! checksum, and the ordered list of encrypted chunks with their per-slice
//! verification hashes. Encoded with the canonical codec, encrypted under the
//! checksum-derived key, and stored as a chunk of its own; the digest of that
//! encrypted blob is the *tornet id*.

use crate::codec::{Decode, Encode, Reader, Sink};
use crate::digest::Digest;
use crate::error::{Result, TornetError};

/// One encrypted chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkEntry {
    /// Digest of the encrypted chunk bytes.
    pub id: Digest,
    /// Unpadded plaintext length of this window.
    pub size: u64,
    /// One 32-bit hash per 64 KiB slice of the encrypted bytes.
    pub slices: Vec<u32>,
}

impl Encode for ChunkEntry {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        self.id.encode(out);
        out.put_u64(self.size);
        self.slices.encode(out);
    }
}

impl Decode for ChunkEntry {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            id: Digest::decode(r)?,
            size: r.u64()?,
            slices: Vec::<u32>::decode(r)?,
        })
    }
}

/// Manifest of an imported file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Original file name (basename only).
    pub name: String,
    /// Unpadded plaintext file size.
    pub size: u64,
    /// Digest of the plaintext file.
    pub checksum: Digest,
    /// Chunks in file order.
    pub chunks: Vec<ChunkEntry>,
}

impl Descriptor {
    /// Verify the structural invariant: chunk sizes sum to the file size.
    pub fn validate(&self) -> Result<()> {
        let total: u64 = self.chunks.iter().map(|c| c.size).sum();
        if total != self.size {
            return Err(TornetError::Protocol(format!(
                "descriptor chunk sizes sum to {}, expected {}",
                total, self.size
            )));
        }
        Ok(())
    }
}

impl Encode for Descriptor {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        self.name.encode(out);
        out.put_u64(self.size);
        self.checksum.encode(out);
        self.chunks.encode(out);
    }
}

impl Decode for Descriptor {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            name: String::decode(r)?,
            size: r.u64()?,
            checksum: Digest::decode(r)?,
            chunks: Vec::<ChunkEntry>::decode(r)?,
        })
    }
}
