//! Tornet Name Chain
//!
//! A proof-of-work block chain that records ownership of human-readable
//! names bound to tornet ids. Every transaction is itself a hash puzzle
//! (its digest must fall below the transaction threshold) and commits to
//! the header of the block it hopes to land in; the transaction that also
//! falls below the block threshold wins the block.
//!
//! - `transaction`: the four name transaction kinds and their signatures
//! - `block`: block records, base hash, difficulty
//! - `pow`: hash-puzzle checks and the cancellable nonce search
//! - `difficulty`: per-block threshold retargeting
//! - `chain`: validation rules, chain state, expiry, reorganisation
//! - `store`: sled-backed block/transaction persistence

pub mod block;
pub mod chain;
pub mod difficulty;
pub mod pow;
pub mod store;
pub mod transaction;

pub use block::NameBlock;
pub use chain::{ChainConfig, NameChain, NameRecord};
pub use pow::{find_nonce, validate_trx_hash};
pub use store::ChainStore;
pub use transaction::{reservation_id, NameTrx, TrxHeader};

/// Target spacing between blocks.
pub const TARGET_BLOCK_INTERVAL_US: u64 = 10 * 60 * 1_000_000;

/// Hard minimum spacing: a block's timestamp must be at least this far
/// past its parent's.
pub const MIN_BLOCK_SPACING_US: u64 = 8 * 60 * 1_000_000;

/// Names and reservations expire after six months of block time without
/// activity; transaction bodies older than this are purged.
pub const NAME_EXPIRY_US: u64 = 183 * 24 * 60 * 60 * 1_000_000;
