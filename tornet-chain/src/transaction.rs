//! Name transactions
//!
//! Four kinds share a header that commits to a block's base hash and
//! carries the proof-of-work nonce and an ed25519 signature:
//! - `reserve`: commit to a name without revealing it
//! - `publish`: reveal the name and bind it to a tornet id
//! - `update`: repoint an owned name at a new tornet id
//! - `transfer`: hand an owned name to another key
//!
//! A transaction's identity is the digest of its encoding; validity
//! requires that identity to fall below the transaction threshold.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use tornet_core::codec::{Decode, Encode, Reader, Sink};
use tornet_core::digest::{digest_of, Digest};
use tornet_core::error::{Result, TornetError};

pub const TRX_RESERVE: u8 = 1;
pub const TRX_PUBLISH: u8 = 2;
pub const TRX_UPDATE: u8 = 3;
pub const TRX_TRANSFER: u8 = 4;

pub const PUB_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Header shared by every transaction kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrxHeader {
    /// Base hash of the block header this transaction commits to.
    pub base: Digest,
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Transaction kind tag.
    pub trx_type: u8,
    /// ed25519 signature over the transaction with this field zeroed.
    pub signature: [u8; SIGNATURE_LEN],
}

impl TrxHeader {
    pub fn new(base: Digest, trx_type: u8) -> Self {
        Self {
            base,
            nonce: 0,
            trx_type,
            signature: [0u8; SIGNATURE_LEN],
        }
    }
}

impl Encode for TrxHeader {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        self.base.encode(out);
        out.put_u64(self.nonce);
        out.put_u8(self.trx_type);
        out.put(&self.signature);
    }
}

impl Decode for TrxHeader {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let base = Digest::decode(r)?;
        let nonce = r.u64()?;
        let trx_type = r.u8()?;
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(r.take(SIGNATURE_LEN)?);
        Ok(Self {
            base,
            nonce,
            trx_type,
            signature,
        })
    }
}

/// A name transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTrx {
    Reserve {
        head: TrxHeader,
        pub_key: [u8; PUB_KEY_LEN],
        res_id: Digest,
    },
    Publish {
        head: TrxHeader,
        name: String,
        rand: u64,
        site_ref: Digest,
    },
    Update {
        head: TrxHeader,
        name_id: Digest,
        update_count: u32,
        site_ref: Digest,
    },
    Transfer {
        head: TrxHeader,
        name_id: Digest,
        to_pub_key: [u8; PUB_KEY_LEN],
    },
}

impl NameTrx {
    pub fn reserve(base: Digest, pub_key: [u8; PUB_KEY_LEN], res_id: Digest) -> Self {
        Self::Reserve {
            head: TrxHeader::new(base, TRX_RESERVE),
            pub_key,
            res_id,
        }
    }

    pub fn publish(base: Digest, name: String, rand: u64, site_ref: Digest) -> Self {
        Self::Publish {
            head: TrxHeader::new(base, TRX_PUBLISH),
            name,
            rand,
            site_ref,
        }
    }

    pub fn update(base: Digest, name_id: Digest, update_count: u32, site_ref: Digest) -> Self {
        Self::Update {
            head: TrxHeader::new(base, TRX_UPDATE),
            name_id,
            update_count,
            site_ref,
        }
    }

    pub fn transfer(base: Digest, name_id: Digest, to_pub_key: [u8; PUB_KEY_LEN]) -> Self {
        Self::Transfer {
            head: TrxHeader::new(base, TRX_TRANSFER),
            name_id,
            to_pub_key,
        }
    }

    pub fn head(&self) -> &TrxHeader {
        match self {
            Self::Reserve { head, .. }
            | Self::Publish { head, .. }
            | Self::Update { head, .. }
            | Self::Transfer { head, .. } => head,
        }
    }

    pub fn head_mut(&mut self) -> &mut TrxHeader {
        match self {
            Self::Reserve { head, .. }
            | Self::Publish { head, .. }
            | Self::Update { head, .. }
            | Self::Transfer { head, .. } => head,
        }
    }

    /// Transaction identity: the digest of its canonical encoding.
    pub fn id(&self) -> Digest {
        digest_of(self)
    }

    /// Digest signed by the owner: the transaction with its signature and
    /// nonce zeroed. The nonce stays outside the signature so the
    /// proof-of-work search can vary it after signing.
    pub fn signing_digest(&self) -> Digest {
        let mut unsigned = self.clone();
        unsigned.head_mut().signature = [0u8; SIGNATURE_LEN];
        unsigned.head_mut().nonce = 0;
        digest_of(&unsigned)
    }

    /// Sign with the given key, filling the header's signature field.
    pub fn sign(&mut self, key: &SigningKey) {
        let digest = self.signing_digest();
        let sig: Signature = key.sign(digest.as_bytes());
        self.head_mut().signature = sig.to_bytes();
    }

    /// Verify the header signature against a public key.
    pub fn verify_signature(&self, pub_key: &[u8; PUB_KEY_LEN]) -> Result<()> {
        let vk = VerifyingKey::from_bytes(pub_key)
            .map_err(|e| TornetError::BadSignature(format!("bad public key: {}", e)))?;
        let sig = Signature::from_bytes(&self.head().signature);
        let digest = self.signing_digest();
        vk.verify(digest.as_bytes(), &sig)
            .map_err(|e| TornetError::BadSignature(e.to_string()))
    }
}

impl Encode for NameTrx {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        match self {
            Self::Reserve {
                head,
                pub_key,
                res_id,
            } => {
                head.encode(out);
                out.put(pub_key);
                res_id.encode(out);
            }
            Self::Publish {
                head,
                name,
                rand,
                site_ref,
            } => {
                head.encode(out);
                name.encode(out);
                out.put_u64(*rand);
                site_ref.encode(out);
            }
            Self::Update {
                head,
                name_id,
                update_count,
                site_ref,
            } => {
                head.encode(out);
                name_id.encode(out);
                out.put_u32(*update_count);
                site_ref.encode(out);
            }
            Self::Transfer {
                head,
                name_id,
                to_pub_key,
            } => {
                head.encode(out);
                name_id.encode(out);
                out.put(to_pub_key);
            }
        }
    }
}

impl Decode for NameTrx {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let head = TrxHeader::decode(r)?;
        match head.trx_type {
            TRX_RESERVE => {
                let mut pub_key = [0u8; PUB_KEY_LEN];
                pub_key.copy_from_slice(r.take(PUB_KEY_LEN)?);
                Ok(Self::Reserve {
                    head,
                    pub_key,
                    res_id: Digest::decode(r)?,
                })
            }
            TRX_PUBLISH => Ok(Self::Publish {
                head,
                name: String::decode(r)?,
                rand: r.u64()?,
                site_ref: Digest::decode(r)?,
            }),
            TRX_UPDATE => Ok(Self::Update {
                head,
                name_id: Digest::decode(r)?,
                update_count: r.u32()?,
                site_ref: Digest::decode(r)?,
            }),
            TRX_TRANSFER => {
                let name_id = Digest::decode(r)?;
                let mut to_pub_key = [0u8; PUB_KEY_LEN];
                to_pub_key.copy_from_slice(r.take(PUB_KEY_LEN)?);
                Ok(Self::Transfer {
                    head,
                    name_id,
                    to_pub_key,
                })
            }
            other => Err(TornetError::Protocol(format!(
                "unknown transaction type {}",
                other
            ))),
        }
    }
}

/// Identity of a name: the digest of its UTF-8 bytes.
pub fn name_id(name: &str) -> Digest {
    Digest::compute(name.as_bytes())
}

/// Reservation commitment: binds a hidden name and a salt without
/// revealing either.
pub fn reservation_id(name: &str, rand: u64) -> Digest {
    let mut sink = tornet_core::digest::DigestSink::new();
    name.to_string().encode(&mut sink);
    sink.put_u64(rand);
    sink.finish()
}
