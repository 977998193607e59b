//! Proof-of-work helpers
//!
//! A transaction proves work by having a digest below a threshold; the
//! nonce search is a plain loop that polls a shared cancel flag every
//! iteration.

use std::sync::atomic::{AtomicBool, Ordering};

use tornet_core::digest::Digest;

use crate::transaction::NameTrx;

/// True when the transaction's digest falls below the threshold.
pub fn validate_trx_hash(trx: &NameTrx, threshold: &Digest) -> bool {
    trx.id() < *threshold
}

/// Search `start..end` for a nonce that puts the transaction's digest below
/// `threshold`. Returns the winning nonce, or `end` when exhausted or
/// cancelled; the winning nonce is left set on the transaction.
pub fn find_nonce(
    trx: &mut NameTrx,
    start: u64,
    end: u64,
    threshold: &Digest,
    cancel: &AtomicBool,
) -> u64 {
    let mut nonce = start;
    while nonce < end {
        if cancel.load(Ordering::Relaxed) {
            return end;
        }
        trx.head_mut().nonce = nonce;
        if validate_trx_hash(trx, threshold) {
            return nonce;
        }
        nonce += 1;
    }
    end
}
