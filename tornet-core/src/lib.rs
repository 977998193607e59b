//! Tornet Core Library
//!
//! Shared primitives for the tornet content-addressed storage overlay:
//! - 160-bit content digests with XOR distance (Kademlia metric)
//! - Canonical binary codec (little-endian, length-prefixed)
//! - Blowfish/CBC chunk cipher with explicit chain control
//! - Tornet descriptors (the per-file manifest)
//! - Common error handling

pub mod cipher;
pub mod codec;
pub mod descriptor;
pub mod digest;
pub mod error;

pub use cipher::ChainCipher;
pub use codec::{decode, encode_to_vec, Decode, Encode, Reader, Sink};
pub use descriptor::{ChunkEntry, Descriptor};
pub use digest::{digest_of, slice_hash, slice_hashes, Digest, DigestSink};
pub use error::{Result, TornetError};

/// Cipher block size; every stored chunk is zero-padded to a multiple of this.
pub const CIPHER_BLOCK: usize = 8;

/// Fixed chunk window used when splitting files.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Slice window for partial-transfer verification hashes.
pub const SLICE_SIZE: usize = 64 * 1024;

/// Round `n` up to the next multiple of the cipher block.
pub const fn padded_len(n: usize) -> usize {
    (n + CIPHER_BLOCK - 1) / CIPHER_BLOCK * CIPHER_BLOCK
}

/// Current UTC time in microseconds since the epoch.
pub fn now_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}
