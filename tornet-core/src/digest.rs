//! Content digests
//!
//! 160-bit digests are the single identity in tornet: chunk ids, node ids,
//! name ids, and block ids all live in the same space, compared with the
//! Kademlia XOR metric. Threshold comparison treats a digest as an unsigned
//! big-endian integer, which the derived lexicographic `Ord` provides.

use std::fmt;

use sha1::{Digest as _, Sha1};

use crate::codec::{Decode, Encode, Reader, Sink};
use crate::error::{Result, TornetError};
use crate::SLICE_SIZE;

/// Size of a digest in bytes (160 bits).
pub const DIGEST_LEN: usize = 20;

/// 160-bit content identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// The all-ones digest; used as the permissive threshold.
    pub const MAX: Digest = Digest([0xff; DIGEST_LEN]);

    /// Create a digest from raw bytes
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a digest from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != DIGEST_LEN {
            return Err(TornetError::Protocol(format!(
                "invalid digest length: expected {}, got {}",
                DIGEST_LEN,
                slice.len()
            )));
        }
        let mut arr = [0u8; DIGEST_LEN];
        arr.copy_from_slice(slice);
        Ok(Self(arr))
    }

    /// Compute the digest of a byte buffer
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// XOR distance to another digest (the overlay metric)
    pub fn distance(&self, other: &Digest) -> Digest {
        let mut out = [0u8; DIGEST_LEN];
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.0[i] ^ other.0[i];
        }
        Digest(out)
    }

    /// Lowercase hex rendering (also the cipher key material, see `cipher`)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 40-char hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s)
            .map_err(|e| TornetError::InvalidInput(format!("invalid digest hex: {}", e)))?;
        Self::from_slice(&raw)
            .map_err(|_| TornetError::InvalidInput(format!("invalid digest length: {}", s.len())))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Encode for Digest {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        out.put(&self.0);
    }
}

impl Decode for Digest {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Self::from_slice(r.take(DIGEST_LEN)?)
    }
}

/// A [`Sink`] that hashes instead of buffering, so `D(record)` never
/// materialises the encoding.
pub struct DigestSink(Sha1);

impl DigestSink {
    pub fn new() -> Self {
        Self(Sha1::new())
    }

    pub fn finish(self) -> Digest {
        Digest(self.0.finalize().into())
    }
}

impl Default for DigestSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for DigestSink {
    fn put(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

/// Digest of a record's canonical encoding
pub fn digest_of<T: Encode>(value: &T) -> Digest {
    let mut sink = DigestSink::new();
    value.encode(&mut sink);
    sink.finish()
}

/// 32-bit non-cryptographic hash over one slice window
pub fn slice_hash(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Per-64KiB slice hashes for an encrypted chunk buffer; the last window may
/// be short.
pub fn slice_hashes(buf: &[u8]) -> Vec<u32> {
    buf.chunks(SLICE_SIZE).map(slice_hash).collect()
}
