//! Name chain blocks
//!
//! A block aggregates transaction ids and is solved by its `gen_transaction`:
//! the transaction whose header commits to this block's base hash and whose
//! digest falls below the block threshold. Block difficulty is the number of
//! included transactions, so the winning miner is the one carrying the most
//! foreign transactions.

use tornet_core::codec::{Decode, Encode, Reader, Sink};
use tornet_core::digest::{digest_of, Digest, DigestSink};
use tornet_core::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameBlock {
    pub prev_block_id: Digest,
    /// Approximate generation time, UTC microseconds.
    pub utc_us: u64,
    pub block_num: u64,
    /// Ids of the included transactions.
    pub transactions: Vec<Digest>,
    /// Id of the transaction that solved the block.
    pub gen_transaction: Digest,
}

impl NameBlock {
    /// Hash of the header fields every in-block transaction commits to.
    pub fn base_hash(&self) -> Digest {
        let mut sink = DigestSink::new();
        self.prev_block_id.encode(&mut sink);
        sink.put_u64(self.utc_us);
        sink.put_u64(self.block_num);
        self.transactions.encode(&mut sink);
        sink.finish()
    }

    /// Block identity: digest of the whole record.
    pub fn id(&self) -> Digest {
        digest_of(self)
    }

    /// Difficulty equals the number of included transactions.
    pub fn difficulty(&self) -> u64 {
        self.transactions.len() as u64
    }
}

impl Encode for NameBlock {
    fn encode<S: Sink + ?Sized>(&self, out: &mut S) {
        self.prev_block_id.encode(out);
        out.put_u64(self.utc_us);
        out.put_u64(self.block_num);
        self.transactions.encode(out);
        self.gen_transaction.encode(out);
    }
}

impl Decode for NameBlock {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            prev_block_id: Digest::decode(r)?,
            utc_us: r.u64()?,
            block_num: r.u64()?,
            transactions: Vec::<Digest>::decode(r)?,
            gen_transaction: Digest::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tornet_core::codec::{decode, encode_to_vec};

    fn sample() -> NameBlock {
        NameBlock {
            prev_block_id: Digest::compute(b"prev"),
            utc_us: 1_700_000_000_000_000,
            block_num: 42,
            transactions: vec![Digest::compute(b"t1"), Digest::compute(b"t2")],
            gen_transaction: Digest::compute(b"gen"),
        }
    }

    #[test]
    fn test_codec_roundtrip() {
        let block = sample();
        let buf = encode_to_vec(&block);
        let back: NameBlock = decode(&buf).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_base_hash_excludes_gen() {
        let mut block = sample();
        let base = block.base_hash();
        block.gen_transaction = Digest::compute(b"other gen");
        assert_eq!(block.base_hash(), base);
        assert_ne!(block.id(), sample().id());
    }

    #[test]
    fn test_base_hash_covers_header_fields() {
        let mut block = sample();
        let base = block.base_hash();
        block.utc_us += 1;
        assert_ne!(block.base_hash(), base);
    }

    #[test]
    fn test_difficulty_is_transaction_count() {
        assert_eq!(sample().difficulty(), 2);
    }
}
