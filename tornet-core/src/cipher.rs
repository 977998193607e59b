//! Chunk cipher
//!
//! Blowfish in CBC mode over 8-byte blocks, with the chain state exposed so
//! callers control where a CBC stream begins. A whole file encrypts as one
//! logical stream across its chunks; the descriptor blob gets a fresh chain.
//!
//! The file-pipeline key is the 40-char lowercase hex rendering of the file
//! checksum. This exact derivation is part of the stored-chunk format.

use blowfish::Blowfish;
use cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};

use crate::digest::Digest;
use crate::error::{Result, TornetError};
use crate::CIPHER_BLOCK;

/// Blowfish/CBC with explicit chain control.
pub struct ChainCipher {
    cipher: Blowfish,
    chain: [u8; CIPHER_BLOCK],
}

impl ChainCipher {
    /// Create a cipher from raw key material (4 to 56 bytes).
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Blowfish::new_from_slice(key)
            .map_err(|_| TornetError::InvalidInput(format!("invalid key length: {}", key.len())))?;
        Ok(Self {
            cipher,
            chain: [0u8; CIPHER_BLOCK],
        })
    }

    /// Create a cipher keyed from a digest's hex rendering.
    pub fn from_digest_key(checksum: &Digest) -> Self {
        let key = checksum.to_hex();
        // 40 ascii bytes, always a valid blowfish key length
        Self::new(key.as_bytes()).expect("hex digest is a valid key")
    }

    /// Reset the CBC chain to the zero IV, starting a new stream.
    pub fn reset_chain(&mut self) {
        self.chain = [0u8; CIPHER_BLOCK];
    }

    /// Encrypt `buf` in place, continuing the current chain.
    ///
    /// `buf.len()` must be a multiple of 8; callers zero-pad and remember the
    /// unpadded size.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % CIPHER_BLOCK, 0);
        for block in buf.chunks_exact_mut(CIPHER_BLOCK) {
            for (b, c) in block.iter_mut().zip(self.chain.iter()) {
                *b ^= c;
            }
            self.cipher
                .encrypt_block(Block::<Blowfish>::from_mut_slice(block));
            self.chain.copy_from_slice(block);
        }
    }

    /// Decrypt `buf` in place, continuing the current chain.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len() % CIPHER_BLOCK, 0);
        let mut prev = [0u8; CIPHER_BLOCK];
        for block in buf.chunks_exact_mut(CIPHER_BLOCK) {
            prev.copy_from_slice(block);
            self.cipher
                .decrypt_block(Block::<Blowfish>::from_mut_slice(block));
            for (b, c) in block.iter_mut().zip(self.chain.iter()) {
                *b ^= c;
            }
            self.chain = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Digest {
        Digest::compute(b"cipher test key")
    }

    #[test]
    fn test_roundtrip() {
        let mut enc = ChainCipher::from_digest_key(&test_key());
        let mut dec = ChainCipher::from_digest_key(&test_key());

        let plain = b"sixteen bytes!!!".to_vec();
        let mut buf = plain.clone();
        enc.encrypt(&mut buf);
        assert_ne!(buf, plain);
        dec.decrypt(&mut buf);
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_chain_spans_buffers() {
        // Encrypting two buffers back-to-back must equal encrypting their
        // concatenation: the chunk pipeline depends on this.
        let key = test_key();
        let a = vec![0x11u8; 32];
        let b = vec![0x22u8; 24];

        let mut whole: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
        let mut c1 = ChainCipher::from_digest_key(&key);
        c1.encrypt(&mut whole);

        let mut first = a.clone();
        let mut second = b.clone();
        let mut c2 = ChainCipher::from_digest_key(&key);
        c2.encrypt(&mut first);
        c2.encrypt(&mut second);

        let split: Vec<u8> = first.iter().chain(second.iter()).copied().collect();
        assert_eq!(whole, split);
    }

    #[test]
    fn test_reset_chain_restarts_stream() {
        let key = test_key();
        let plain = vec![0x5au8; 16];

        let mut c = ChainCipher::from_digest_key(&key);
        let mut one = plain.clone();
        c.encrypt(&mut one);

        let mut two = plain.clone();
        c.reset_chain();
        c.encrypt(&mut two);
        assert_eq!(one, two);

        let mut three = plain.clone();
        c.encrypt(&mut three); // chain now mid-stream
        assert_ne!(one, three);
    }

    #[test]
    fn test_wrong_key_garbles() {
        let mut enc = ChainCipher::from_digest_key(&test_key());
        let mut dec = ChainCipher::from_digest_key(&Digest::compute(b"other key"));

        let plain = vec![7u8; 40];
        let mut buf = plain.clone();
        enc.encrypt(&mut buf);
        dec.decrypt(&mut buf);
        assert_ne!(buf, plain);
    }

    #[test]
    fn test_rejects_bad_key_length() {
        assert!(ChainCipher::new(&[1, 2]).is_err());
        assert!(ChainCipher::new(&[0u8; 57]).is_err());
        assert!(ChainCipher::new(&[0u8; 40]).is_ok());
    }
}
