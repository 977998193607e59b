//! Chain validation and state
//!
//! `NameChain` owns the main chain: block validation (rules 1–6), the name
//! ownership state, expiry, difficulty retargeting, and longest-valid-chain
//! reorganisation. Block validation is serialised on the chain task, so the
//! chain takes `&mut self` and needs no interior locking.
//!
//! Validation rules, in order; a failure rejects the block with its number:
//! 1. height and parent linkage
//! 2. timestamp window (min spacing after the parent, never in the future)
//! 3. the gen transaction commits to this block's base hash
//! 4. the gen transaction id matches and falls below the block threshold
//! 5. every listed transaction falls below the transaction threshold, has a
//!    retrievable body, and is anchored to the parent block
//! 6. every transaction is semantically valid against the chain state

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, warn};

use tornet_core::digest::Digest;
use tornet_core::error::{Result, TornetError};

use crate::block::NameBlock;
use crate::difficulty::{retarget, RETARGET_WINDOW};
use crate::store::ChainStore;
use crate::transaction::{NameTrx, PUB_KEY_LEN};
use crate::{MIN_BLOCK_SPACING_US, NAME_EXPIRY_US, TARGET_BLOCK_INTERVAL_US};

/// Chain tunables. The defaults demand roughly 2^24 hash attempts per
/// transaction; tests substitute permissive thresholds.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub trx_threshold: Digest,
    /// Starting block threshold; retargeted after every block.
    pub block_threshold: Digest,
    pub target_interval_us: u64,
    pub min_spacing_us: u64,
    pub name_expiry_us: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        let mut threshold = [0xffu8; 20];
        threshold[0] = 0;
        threshold[1] = 0;
        threshold[2] = 0;
        let threshold = Digest::from_bytes(threshold);
        Self {
            trx_threshold: threshold,
            block_threshold: threshold,
            target_interval_us: TARGET_BLOCK_INTERVAL_US,
            min_spacing_us: MIN_BLOCK_SPACING_US,
            name_expiry_us: NAME_EXPIRY_US,
        }
    }
}

/// Current ownership of a published name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub owner: [u8; PUB_KEY_LEN],
    pub site_ref: Digest,
    pub update_count: u32,
    pub last_activity_us: u64,
}

#[derive(Debug, Clone)]
struct Reservation {
    pub_key: [u8; PUB_KEY_LEN],
    made_us: u64,
}

/// Live name state, rebuilt by replaying the main chain.
#[derive(Debug, Clone, Default)]
struct ChainState {
    /// name id → ownership record
    names: HashMap<Digest, NameRecord>,
    /// reservation commitment → pending reservation
    reservations: HashMap<Digest, Reservation>,
}

/// A position on some branch: state plus validation context.
#[derive(Clone)]
struct Cursor {
    state: ChainState,
    tip: Option<NameBlock>,
    tip_id: Digest,
    block_threshold: Digest,
    /// Timestamps of the most recent blocks, newest last.
    times: VecDeque<u64>,
}

impl Cursor {
    fn genesis(config: &ChainConfig) -> Self {
        Self {
            state: ChainState::default(),
            tip: None,
            tip_id: Digest::default(),
            block_threshold: config.block_threshold,
            times: VecDeque::new(),
        }
    }

    fn height(&self) -> Option<u64> {
        self.tip.as_ref().map(|b| b.block_num)
    }
}

pub struct NameChain {
    store: ChainStore,
    config: ChainConfig,
    cursor: Cursor,
}

impl NameChain {
    /// Open the chain, replaying any persisted main chain to rebuild state.
    pub fn open(store: ChainStore, config: ChainConfig) -> Result<Self> {
        let cursor = replay_main(&store, &config, None)?;
        if let Some(height) = cursor.height() {
            info!(height, "name chain replayed");
        }
        Ok(Self {
            store,
            config,
            cursor,
        })
    }

    pub fn tip(&self) -> Option<&NameBlock> {
        self.cursor.tip.as_ref()
    }

    pub fn tip_id(&self) -> Digest {
        self.cursor.tip_id
    }

    pub fn height(&self) -> Option<u64> {
        self.cursor.height()
    }

    pub fn block_threshold(&self) -> Digest {
        self.cursor.block_threshold
    }

    pub fn trx_threshold(&self) -> Digest {
        self.config.trx_threshold
    }

    /// Resolve a live name to its ownership record as of `as_of_us`.
    pub fn lookup(&self, name_id: &Digest, as_of_us: u64) -> Option<&NameRecord> {
        self.cursor
            .state
            .names
            .get(name_id)
            .filter(|rec| is_live(rec.last_activity_us, as_of_us, self.config.name_expiry_us))
    }

    /// Submit a block. Extends the tip when it links there; otherwise the
    /// block is stored as a side block and a longer valid branch triggers a
    /// reorganisation. Rejections carry the violated rule number.
    pub fn submit_block(
        &mut self,
        block: &NameBlock,
        gen: &NameTrx,
        bodies: &[NameTrx],
        now_us: u64,
    ) -> Result<()> {
        if block.prev_block_id == self.cursor.tip_id {
            advance(&mut self.cursor, &self.config, block, gen, bodies, now_us)?;
            self.persist(block, gen, bodies)?;
            self.store.set_main(block.block_num, &block.id())?;
            self.purge_expired(block.utc_us)?;
            debug!(block_num = block.block_num, id = %block.id(), "extended name chain");
            return Ok(());
        }

        // Side block: sanity-check the proof of work before keeping it.
        precheck_side_block(block, gen, &self.config)?;
        self.persist(block, gen, bodies)?;

        let longer = match self.cursor.height() {
            Some(height) => block.block_num > height,
            None => true,
        };
        if longer {
            self.try_reorg(block, now_us)?;
        }
        Ok(())
    }

    fn persist(&self, block: &NameBlock, gen: &NameTrx, bodies: &[NameTrx]) -> Result<()> {
        self.store.put_block(block)?;
        self.store.put_body(gen)?;
        for body in bodies {
            self.store.put_body(body)?;
        }
        Ok(())
    }

    fn purge_expired(&self, tip_utc_us: u64) -> Result<()> {
        let cutoff = tip_utc_us.saturating_sub(self.config.name_expiry_us);
        self.store.purge_bodies_before(cutoff)?;
        Ok(())
    }

    /// Longest-valid-chain: walk the submitted block's ancestry back to the
    /// main chain, then re-validate the branch from the fork point on a
    /// scratch cursor. Only a fully valid, strictly longer branch is adopted.
    fn try_reorg(&mut self, candidate: &NameBlock, now_us: u64) -> Result<()> {
        let mut branch = vec![candidate.clone()];
        let fork_num = loop {
            let first = &branch[branch.len() - 1];
            if first.block_num == 0 {
                break None;
            }
            let parent_num = first.block_num - 1;
            if self.store.main_id(parent_num)? == Some(first.prev_block_id) {
                break Some(parent_num);
            }
            let parent = match self.store.block(&first.prev_block_id)? {
                Some(parent) => parent,
                None => {
                    debug!(id = %first.prev_block_id, "branch parent unknown, deferring reorg");
                    return Ok(());
                }
            };
            branch.push(parent);
        };
        branch.reverse();

        // branch from genesis starts from an empty state
        let mut scratch = match fork_num {
            Some(num) => replay_main(&self.store, &self.config, Some(num))?,
            None => Cursor::genesis(&self.config),
        };
        for block in &branch {
            let gen = self
                .store
                .body(&block.gen_transaction)?
                .ok_or_else(|| rule(5, "gen transaction body missing"))?;
            let mut bodies = Vec::with_capacity(block.transactions.len());
            for trx_id in &block.transactions {
                bodies.push(
                    self.store
                        .body(trx_id)?
                        .ok_or_else(|| rule(5, "transaction body missing"))?,
                );
            }
            advance(&mut scratch, &self.config, block, &gen, &bodies, now_us)?;
        }

        warn!(
            from = ?self.cursor.height(),
            to = candidate.block_num,
            fork = ?fork_num,
            "reorganising to longer chain"
        );
        // The branch is strictly longer, so rewriting its heights covers
        // every stale main-chain entry above the fork.
        for block in &branch {
            self.store.set_main(block.block_num, &block.id())?;
        }
        self.cursor = scratch;
        Ok(())
    }
}

fn rule(rule: u8, detail: impl Into<String>) -> TornetError {
    TornetError::BlockRejected {
        rule,
        detail: detail.into(),
    }
}

fn is_live(last_activity_us: u64, as_of_us: u64, expiry_us: u64) -> bool {
    as_of_us.saturating_sub(last_activity_us) <= expiry_us
}

/// Cheap structural checks applied to side blocks before storing them.
fn precheck_side_block(block: &NameBlock, gen: &NameTrx, config: &ChainConfig) -> Result<()> {
    if gen.head().base != block.base_hash() {
        return Err(rule(3, "gen transaction does not commit to base hash"));
    }
    if gen.id() != block.gen_transaction {
        return Err(rule(4, "gen transaction id mismatch"));
    }
    for trx_id in &block.transactions {
        if !(*trx_id < config.trx_threshold) {
            return Err(rule(5, format!("transaction {} above threshold", trx_id)));
        }
    }
    Ok(())
}

/// Validate `block` against the cursor and, on success, advance the cursor
/// onto it.
fn advance(
    cursor: &mut Cursor,
    config: &ChainConfig,
    block: &NameBlock,
    gen: &NameTrx,
    bodies: &[NameTrx],
    now_us: u64,
) -> Result<()> {
    // rule 1: linkage
    match &cursor.tip {
        Some(tip) => {
            if block.block_num != tip.block_num + 1 {
                return Err(rule(
                    1,
                    format!("block num {} after {}", block.block_num, tip.block_num),
                ));
            }
            if block.prev_block_id != cursor.tip_id {
                return Err(rule(1, "previous block id does not match chain tip"));
            }
        }
        None => {
            if block.block_num != 0 || block.prev_block_id != Digest::default() {
                return Err(rule(1, "genesis block must have height 0 and zero parent"));
            }
        }
    }

    // rule 2: timestamp window
    if let Some(tip) = &cursor.tip {
        if block.utc_us < tip.utc_us + config.min_spacing_us {
            return Err(rule(
                2,
                format!(
                    "block at {} is within the minimum spacing after {}",
                    block.utc_us, tip.utc_us
                ),
            ));
        }
    }
    if block.utc_us > now_us {
        return Err(rule(2, "block timestamp is in the future"));
    }

    // rule 3: gen commitment
    let base = block.base_hash();
    if gen.head().base != base {
        return Err(rule(3, "gen transaction does not commit to base hash"));
    }

    // rule 4: gen proof of work
    let gen_id = gen.id();
    if gen_id != block.gen_transaction {
        return Err(rule(4, "gen transaction id mismatch"));
    }
    if !(gen_id < cursor.block_threshold) {
        return Err(rule(4, "gen transaction above block threshold"));
    }

    // rule 5: listed transactions. Their ids are part of the base hash, so
    // they anchor to the parent block id rather than the base itself.
    let mut by_id: HashMap<Digest, &NameTrx> = HashMap::with_capacity(bodies.len());
    for body in bodies {
        by_id.insert(body.id(), body);
    }
    for trx_id in &block.transactions {
        if !(*trx_id < config.trx_threshold) {
            return Err(rule(5, format!("transaction {} above threshold", trx_id)));
        }
        let body = by_id
            .get(trx_id)
            .ok_or_else(|| rule(5, format!("transaction {} body missing", trx_id)))?;
        if body.head().base != block.prev_block_id {
            return Err(rule(
                5,
                format!("transaction {} not anchored to parent block", trx_id),
            ));
        }
    }

    // rule 6: semantic validity on a scratch state
    let mut next = cursor.state.clone();
    for trx_id in &block.transactions {
        apply_trx(&mut next, by_id[trx_id], block.utc_us, config.name_expiry_us)?;
    }
    if !block.transactions.contains(&gen_id) {
        apply_trx(&mut next, gen, block.utc_us, config.name_expiry_us)?;
    }

    // accepted: move the cursor
    cursor.state = next;
    cursor.tip_id = block.id();
    cursor.tip = Some(block.clone());
    cursor.times.push_back(block.utc_us);
    while cursor.times.len() > RETARGET_WINDOW + 1 {
        cursor.times.pop_front();
    }
    let deltas: Vec<u64> = cursor
        .times
        .iter()
        .zip(cursor.times.iter().skip(1))
        .map(|(a, b)| b.saturating_sub(*a))
        .collect();
    cursor.block_threshold = retarget(
        &cursor.block_threshold,
        &deltas,
        config.target_interval_us,
        &config.trx_threshold,
    );
    Ok(())
}

/// Apply one transaction to the state; any failure is a rule-6 rejection.
fn apply_trx(state: &mut ChainState, trx: &NameTrx, utc_us: u64, expiry_us: u64) -> Result<()> {
    let signature_err = |e: TornetError| rule(6, format!("bad signature: {}", e));
    match trx {
        NameTrx::Reserve {
            pub_key, res_id, ..
        } => {
            if let Some(existing) = state.reservations.get(res_id) {
                if is_live(existing.made_us, utc_us, expiry_us) {
                    return Err(rule(6, format!("reservation {} already live", res_id)));
                }
            }
            trx.verify_signature(pub_key).map_err(signature_err)?;
            state.reservations.insert(
                *res_id,
                Reservation {
                    pub_key: *pub_key,
                    made_us: utc_us,
                },
            );
        }
        NameTrx::Publish {
            name,
            rand,
            site_ref,
            ..
        } => {
            let res_id = crate::transaction::reservation_id(name, *rand);
            let reservation = state
                .reservations
                .get(&res_id)
                .filter(|r| is_live(r.made_us, utc_us, expiry_us))
                .cloned()
                .ok_or_else(|| rule(6, format!("publish of '{}' has no live reservation", name)))?;
            trx.verify_signature(&reservation.pub_key)
                .map_err(signature_err)?;

            let name_id = crate::transaction::name_id(name);
            if let Some(existing) = state.names.get(&name_id) {
                if is_live(existing.last_activity_us, utc_us, expiry_us) {
                    return Err(rule(6, format!("name '{}' already claimed", name)));
                }
            }
            state.names.insert(
                name_id,
                NameRecord {
                    owner: reservation.pub_key,
                    site_ref: *site_ref,
                    update_count: 0,
                    last_activity_us: utc_us,
                },
            );
            state.reservations.remove(&res_id);
        }
        NameTrx::Update {
            name_id,
            update_count,
            site_ref,
            ..
        } => {
            let record = state
                .names
                .get_mut(name_id)
                .ok_or_else(|| rule(6, format!("update of unknown name {}", name_id)))?;
            if !is_live(record.last_activity_us, utc_us, expiry_us) {
                return Err(rule(6, format!("update references expired name {}", name_id)));
            }
            let owner = record.owner;
            trx.verify_signature(&owner).map_err(signature_err)?;
            if *update_count != record.update_count + 1 {
                return Err(rule(
                    6,
                    format!(
                        "update count {} does not follow {}",
                        update_count, record.update_count
                    ),
                ));
            }
            record.update_count = *update_count;
            record.site_ref = *site_ref;
            record.last_activity_us = utc_us;
        }
        NameTrx::Transfer {
            name_id,
            to_pub_key,
            ..
        } => {
            let record = state
                .names
                .get_mut(name_id)
                .ok_or_else(|| rule(6, format!("transfer of unknown name {}", name_id)))?;
            if !is_live(record.last_activity_us, utc_us, expiry_us) {
                return Err(rule(
                    6,
                    format!("transfer references expired name {}", name_id),
                ));
            }
            let owner = record.owner;
            trx.verify_signature(&owner).map_err(signature_err)?;
            record.owner = *to_pub_key;
            record.last_activity_us = utc_us;
        }
    }
    Ok(())
}

/// Rebuild a cursor by replaying the persisted main chain up to
/// `upto_num` (inclusive; `None` replays everything).
///
/// Bodies of expired blocks may have been purged; their state effects are
/// expired too, so semantic failures during replay of such blocks are
/// tolerated.
fn replay_main(store: &ChainStore, config: &ChainConfig, upto_num: Option<u64>) -> Result<Cursor> {
    let mut cursor = Cursor::genesis(config);
    let height = match store.main_height()? {
        Some(height) => height,
        None => return Ok(cursor),
    };
    let end = upto_num.unwrap_or(height).min(height);

    for num in 0..=end {
        let id = store
            .main_id(num)?
            .ok_or_else(|| TornetError::Storage(format!("main chain gap at {}", num)))?;
        let block = store
            .block(&id)?
            .ok_or_else(|| TornetError::Storage(format!("missing block {}", id)))?;

        for trx_id in block.transactions.iter().chain([&block.gen_transaction]) {
            if let Some(body) = store.body(trx_id)? {
                let _ = apply_trx(
                    &mut cursor.state,
                    &body,
                    block.utc_us,
                    config.name_expiry_us,
                );
            }
        }

        cursor.tip_id = block.id();
        cursor.times.push_back(block.utc_us);
        while cursor.times.len() > RETARGET_WINDOW + 1 {
            cursor.times.pop_front();
        }
        let deltas: Vec<u64> = cursor
            .times
            .iter()
            .zip(cursor.times.iter().skip(1))
            .map(|(a, b)| b.saturating_sub(*a))
            .collect();
        cursor.block_threshold = retarget(
            &cursor.block_threshold,
            &deltas,
            config.target_interval_us,
            &config.trx_threshold,
        );
        cursor.tip = Some(block);
    }
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{name_id, reservation_id};
    use ed25519_dalek::SigningKey;

    const T0: u64 = 1_700_000_000_000_000;
    const SPACING: u64 = MIN_BLOCK_SPACING_US;
    const FAR_FUTURE: u64 = T0 + 1_000 * SPACING;

    fn permissive_config() -> ChainConfig {
        ChainConfig {
            trx_threshold: Digest::MAX,
            block_threshold: Digest::MAX,
            ..Default::default()
        }
    }

    fn open_chain() -> NameChain {
        NameChain::open(ChainStore::open_temporary().unwrap(), permissive_config()).unwrap()
    }

    fn key(n: u8) -> SigningKey {
        SigningKey::from_bytes(&[n; 32])
    }

    fn pub_key(n: u8) -> [u8; 32] {
        key(n).verifying_key().to_bytes()
    }

    fn signed_reserve(anchor: Digest, signer: u8, name: &str, rand: u64) -> NameTrx {
        let sk = key(signer);
        let mut trx = NameTrx::reserve(anchor, sk.verifying_key().to_bytes(), reservation_id(name, rand));
        trx.sign(&sk);
        trx
    }

    fn signed_publish(anchor: Digest, signer: u8, name: &str, rand: u64, site: Digest) -> NameTrx {
        let mut trx = NameTrx::publish(anchor, name.to_string(), rand, site);
        trx.sign(&key(signer));
        trx
    }

    fn signed_update(anchor: Digest, signer: u8, name: &str, count: u32, site: Digest) -> NameTrx {
        let mut trx = NameTrx::update(anchor, name_id(name), count, site);
        trx.sign(&key(signer));
        trx
    }

    fn signed_transfer(anchor: Digest, signer: u8, name: &str, to: [u8; 32]) -> NameTrx {
        let mut trx = NameTrx::transfer(anchor, name_id(name), to);
        trx.sign(&key(signer));
        trx
    }

    /// Build a block on an explicit parent; the gen transaction is a unique
    /// reserve signed by `gen_seed`'s key.
    fn block_on(
        prev_block_id: Digest,
        block_num: u64,
        utc_us: u64,
        trxs: &[NameTrx],
        gen_seed: u8,
    ) -> (NameBlock, NameTrx) {
        let mut block = NameBlock {
            prev_block_id,
            utc_us,
            block_num,
            transactions: trxs.iter().map(|t| t.id()).collect(),
            gen_transaction: Digest::default(),
        };
        let sk = key(gen_seed);
        let mut gen = NameTrx::reserve(
            block.base_hash(),
            sk.verifying_key().to_bytes(),
            reservation_id(&format!("miner-{}-{}", block_num, gen_seed), utc_us),
        );
        gen.sign(&sk);
        block.gen_transaction = gen.id();
        (block, gen)
    }

    /// Build a block extending the current tip.
    fn next_block(chain: &NameChain, utc_us: u64, trxs: &[NameTrx]) -> (NameBlock, NameTrx) {
        let num = chain.height().map(|h| h + 1).unwrap_or(0);
        block_on(chain.tip_id(), num, utc_us, trxs, 200)
    }

    fn extend(chain: &mut NameChain, utc_us: u64, trxs: &[NameTrx]) {
        let (block, gen) = next_block(chain, utc_us, trxs);
        chain.submit_block(&block, &gen, trxs, FAR_FUTURE).unwrap();
    }

    fn rejected_rule(result: Result<()>) -> u8 {
        match result {
            Err(TornetError::BlockRejected { rule, .. }) => rule,
            other => panic!("expected block rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_genesis_and_extension() {
        let mut chain = open_chain();
        assert!(chain.tip().is_none());

        extend(&mut chain, T0, &[]);
        assert_eq!(chain.height(), Some(0));

        extend(&mut chain, T0 + SPACING, &[]);
        assert_eq!(chain.height(), Some(1));
    }

    #[test]
    fn test_reserve_publish_update_transfer() {
        let mut chain = open_chain();
        let site_a = Digest::compute(b"site v1");
        let site_b = Digest::compute(b"site v2");

        extend(&mut chain, T0, &[]);
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + SPACING,
            &[signed_reserve(tip, 1, "example", 7)],
        );
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 2 * SPACING,
            &[signed_publish(tip, 1, "example", 7, site_a)],
        );

        let rec = chain.lookup(&name_id("example"), T0 + 2 * SPACING).unwrap();
        assert_eq!(rec.owner, pub_key(1));
        assert_eq!(rec.site_ref, site_a);
        assert_eq!(rec.update_count, 0);

        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 3 * SPACING,
            &[signed_update(tip, 1, "example", 1, site_b)],
        );
        let rec = chain.lookup(&name_id("example"), T0 + 3 * SPACING).unwrap();
        assert_eq!(rec.site_ref, site_b);
        assert_eq!(rec.update_count, 1);

        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 4 * SPACING,
            &[signed_transfer(tip, 1, "example", pub_key(2))],
        );
        let rec = chain.lookup(&name_id("example"), T0 + 4 * SPACING).unwrap();
        assert_eq!(rec.owner, pub_key(2));
    }

    #[test]
    fn test_rule1_bad_height_and_parent() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        let (block, gen) = block_on(chain.tip_id(), 2, T0 + SPACING, &[], 200);
        assert_eq!(rejected_rule(chain.submit_block(&block, &gen, &[], FAR_FUTURE)), 1);

        let (block, gen) = block_on(Digest::default(), 1, T0 + SPACING, &[], 200);
        assert_eq!(rejected_rule(chain.submit_block(&block, &gen, &[], FAR_FUTURE)), 1);
    }

    #[test]
    fn test_rule2_minimum_spacing() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        // one microsecond short of the eight-minute spacing
        let (block, gen) = next_block(&chain, T0 + SPACING - 1_000_000, &[]);
        assert_eq!(rejected_rule(chain.submit_block(&block, &gen, &[], FAR_FUTURE)), 2);
    }

    #[test]
    fn test_rule2_future_timestamp() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        let (block, gen) = next_block(&chain, T0 + 2 * SPACING, &[]);
        // wall clock sits before the block's claimed time
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[], T0 + SPACING)),
            2
        );
    }

    #[test]
    fn test_rule3_gen_base_mismatch() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        let (block, _) = next_block(&chain, T0 + SPACING, &[]);
        let sk = key(200);
        let mut bad_gen = NameTrx::reserve(
            Digest::compute(b"wrong base"),
            sk.verifying_key().to_bytes(),
            reservation_id("x", 1),
        );
        bad_gen.sign(&sk);
        let mut block = block;
        block.gen_transaction = bad_gen.id();
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &bad_gen, &[], FAR_FUTURE)),
            3
        );
    }

    #[test]
    fn test_rule4_gen_id_mismatch() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        let (mut block, gen) = next_block(&chain, T0 + SPACING, &[]);
        block.gen_transaction = Digest::compute(b"not the gen");
        // base hash ignores gen_transaction, so rule 3 still passes
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[], FAR_FUTURE)),
            4
        );
    }

    #[test]
    fn test_rule4_gen_above_block_threshold() {
        let config = ChainConfig {
            trx_threshold: Digest::MAX,
            block_threshold: Digest::default(), // nothing passes
            ..Default::default()
        };
        let mut chain = NameChain::open(ChainStore::open_temporary().unwrap(), config).unwrap();
        let (block, gen) = block_on(Digest::default(), 0, T0, &[], 200);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[], FAR_FUTURE)),
            4
        );
    }

    #[test]
    fn test_rule5_missing_body() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        let trx = signed_reserve(chain.tip_id(), 1, "example", 7);
        let (block, gen) = next_block(&chain, T0 + SPACING, &[trx]);
        // body not supplied
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[], FAR_FUTURE)),
            5
        );
    }

    #[test]
    fn test_rule5_wrong_anchor() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);
        extend(&mut chain, T0 + SPACING, &[]);

        // anchored to the genesis block instead of the tip
        let stale = signed_reserve(
            chain.store.main_id(0).unwrap().unwrap(),
            1,
            "example",
            7,
        );
        let (block, gen) = next_block(&chain, T0 + 2 * SPACING, &[stale.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[stale], FAR_FUTURE)),
            5
        );
    }

    #[test]
    fn test_rule5_transaction_above_threshold() {
        let mut low = [0u8; 20];
        low[19] = 1;
        let config = ChainConfig {
            trx_threshold: Digest::from_bytes(low),
            block_threshold: Digest::MAX,
            ..Default::default()
        };
        let mut chain = NameChain::open(ChainStore::open_temporary().unwrap(), config).unwrap();
        extend(&mut chain, T0, &[]);

        let trx = signed_reserve(chain.tip_id(), 1, "example", 7);
        let (block, gen) = next_block(&chain, T0 + SPACING, &[trx.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[trx], FAR_FUTURE)),
            5
        );
    }

    #[test]
    fn test_rule6_publish_without_reservation() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);

        let trx = signed_publish(chain.tip_id(), 1, "example", 7, Digest::compute(b"s"));
        let (block, gen) = next_block(&chain, T0 + SPACING, &[trx.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[trx], FAR_FUTURE)),
            6
        );
    }

    #[test]
    fn test_rule6_reservation_collision() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + SPACING,
            &[signed_reserve(tip, 1, "example", 7)],
        );

        // same commitment from another key
        let clash = signed_reserve(chain.tip_id(), 2, "example", 7);
        let (block, gen) = next_block(&chain, T0 + 2 * SPACING, &[clash.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[clash], FAR_FUTURE)),
            6
        );
    }

    #[test]
    fn test_rule6_update_by_non_owner() {
        let mut chain = open_chain();
        let site = Digest::compute(b"site");
        extend(&mut chain, T0, &[]);
        let tip = chain.tip_id();
        extend(&mut chain, T0 + SPACING, &[signed_reserve(tip, 1, "example", 7)]);
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 2 * SPACING,
            &[signed_publish(tip, 1, "example", 7, site)],
        );

        let forged = signed_update(chain.tip_id(), 2, "example", 1, site);
        let (block, gen) = next_block(&chain, T0 + 3 * SPACING, &[forged.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[forged], FAR_FUTURE)),
            6
        );
    }

    #[test]
    fn test_rule6_update_count_must_follow() {
        let mut chain = open_chain();
        let site = Digest::compute(b"site");
        extend(&mut chain, T0, &[]);
        let tip = chain.tip_id();
        extend(&mut chain, T0 + SPACING, &[signed_reserve(tip, 1, "example", 7)]);
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 2 * SPACING,
            &[signed_publish(tip, 1, "example", 7, site)],
        );

        let skip = signed_update(chain.tip_id(), 1, "example", 2, site);
        let (block, gen) = next_block(&chain, T0 + 3 * SPACING, &[skip.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[skip], FAR_FUTURE)),
            6
        );
    }

    #[test]
    fn test_expired_name_is_reclaimable() {
        let config = ChainConfig {
            trx_threshold: Digest::MAX,
            block_threshold: Digest::MAX,
            name_expiry_us: 3 * SPACING,
            ..Default::default()
        };
        let mut chain = NameChain::open(ChainStore::open_temporary().unwrap(), config).unwrap();
        let site = Digest::compute(b"site");

        extend(&mut chain, T0, &[]);
        let tip = chain.tip_id();
        extend(&mut chain, T0 + SPACING, &[signed_reserve(tip, 1, "example", 7)]);
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 2 * SPACING,
            &[signed_publish(tip, 1, "example", 7, site)],
        );
        // idle blocks push block time past the expiry window
        for n in 3..=6 {
            extend(&mut chain, T0 + n * SPACING, &[]);
        }

        // the owner can no longer update
        let late = signed_update(chain.tip_id(), 1, "example", 1, site);
        let (block, gen) = next_block(&chain, T0 + 7 * SPACING, &[late.clone()]);
        assert_eq!(
            rejected_rule(chain.submit_block(&block, &gen, &[late], FAR_FUTURE)),
            6
        );
        assert!(chain.lookup(&name_id("example"), T0 + 7 * SPACING).is_none());

        // and another key can reserve and publish the same name
        let tip = chain.tip_id();
        extend(&mut chain, T0 + 7 * SPACING, &[signed_reserve(tip, 2, "example", 99)]);
        let tip = chain.tip_id();
        extend(
            &mut chain,
            T0 + 8 * SPACING,
            &[signed_publish(tip, 2, "example", 99, site)],
        );
        let rec = chain.lookup(&name_id("example"), T0 + 8 * SPACING).unwrap();
        assert_eq!(rec.owner, pub_key(2));
    }

    #[test]
    fn test_longest_valid_chain_wins() {
        let mut chain = open_chain();
        extend(&mut chain, T0, &[]);
        let genesis_id = chain.tip_id();
        extend(&mut chain, T0 + SPACING, &[]);
        let main_tip = chain.tip_id();

        // competing branch from genesis, one block longer, carrying a name
        let reserve = signed_reserve(genesis_id, 5, "forked", 13);
        let (b1, g1) = block_on(genesis_id, 1, T0 + SPACING, &[reserve.clone()], 201);
        let publish = signed_publish(b1.id(), 5, "forked", 13, Digest::compute(b"fork site"));
        let (b2, g2) = block_on(b1.id(), 2, T0 + 2 * SPACING, &[publish.clone()], 202);

        // same height as main: stored, no reorg
        chain.submit_block(&b1, &g1, &[reserve], FAR_FUTURE).unwrap();
        assert_eq!(chain.tip_id(), main_tip);

        // longer: reorg replays from the fork point
        chain.submit_block(&b2, &g2, &[publish], FAR_FUTURE).unwrap();
        assert_eq!(chain.height(), Some(2));
        assert_eq!(chain.tip_id(), b2.id());
        let rec = chain.lookup(&name_id("forked"), T0 + 2 * SPACING).unwrap();
        assert_eq!(rec.owner, pub_key(5));
    }

    #[test]
    fn test_reopen_replays_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let site = Digest::compute(b"site");
        {
            let store = ChainStore::open(dir.path()).unwrap();
            let mut chain = NameChain::open(store, permissive_config()).unwrap();
            extend(&mut chain, T0, &[]);
            let tip = chain.tip_id();
            extend(&mut chain, T0 + SPACING, &[signed_reserve(tip, 1, "example", 7)]);
            let tip = chain.tip_id();
            extend(
                &mut chain,
                T0 + 2 * SPACING,
                &[signed_publish(tip, 1, "example", 7, site)],
            );
            chain.store.flush().unwrap();
        }

        let store = ChainStore::open(dir.path()).unwrap();
        let chain = NameChain::open(store, permissive_config()).unwrap();
        assert_eq!(chain.height(), Some(2));
        let rec = chain.lookup(&name_id("example"), T0 + 2 * SPACING).unwrap();
        assert_eq!(rec.owner, pub_key(1));
    }
}
