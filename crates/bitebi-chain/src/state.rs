//! The chain + UTXO engine (§4.5) and its orphan pool integration (§4.6).
//!
//! `Chain` owns the entirety of the process-wide chain state described in
//! §3 behind a single `parking_lot::Mutex`. Every public method acquires
//! the guard for exactly as long as it needs and never lets a reference
//! into the guarded state escape (§9: "forbid any API that lets a
//! reference escape past the guard's release").

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bitebi_core::hash::satisfies_target;
use bitebi_core::{Block, Hash256, OutPoint, Transaction};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{BlockError, TxError};
use crate::observer::TransactionObserver;
use crate::orphan::OrphanPool;

/// Default orphan TTL from §3 "Ownership & lifecycle" / §4.6.
pub const DEFAULT_ORPHAN_TTL: Duration = Duration::from_secs(600);

struct Inner {
    blocks: Vec<Block>,
    height_of: HashMap<Hash256, u64>,
    txs: HashMap<Hash256, Transaction>,
    mempool: BTreeSet<Hash256>,
    utxo: HashMap<OutPoint, bool>,
    mine_epoch: u64,
    orphans: OrphanPool,
    observers: Vec<Arc<dyn TransactionObserver>>,
}

/// The chain + UTXO engine, orphan pool, and mempool, all guarded by a
/// single mutex (§3). Share one `Chain` (behind an `Arc`) between the
/// miner thread and every peer-connection thread.
pub struct Chain {
    inner: Mutex<Inner>,
}

impl Chain {
    /// Start a fresh chain rooted at `genesis`. `genesis` becomes
    /// `blocks[0]` (I1) and is never itself PoW- or Merkle-checked (that
    /// only binds heights ≥ 1, per I3's "for all i ≥ 1").
    pub fn new(genesis: Block) -> Self {
        let mut height_of = HashMap::new();
        height_of.insert(genesis.hash(), 0);
        let mut txs = HashMap::new();
        for tx in &genesis.txs {
            txs.insert(tx.txid(), tx.clone());
        }
        Self {
            inner: Mutex::new(Inner {
                blocks: vec![genesis],
                height_of,
                txs,
                mempool: BTreeSet::new(),
                utxo: HashMap::new(),
                mine_epoch: 0,
                orphans: OrphanPool::default(),
                observers: Vec::new(),
            }),
        }
    }

    /// Register a wallet (or other) observer to be notified, under the
    /// chain mutex, of every newly-seen transaction (§4.5, §9).
    pub fn register_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.inner.lock().observers.push(observer);
    }

    /// `len(chain)`: the height a newly mined block would occupy.
    pub fn len(&self) -> u64 {
        self.inner.lock().blocks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        false // a genesis block is always present
    }

    pub fn mine_epoch(&self) -> u64 {
        self.inner.lock().mine_epoch
    }

    /// Bump `mine_epoch` without otherwise touching chain state (§4.7
    /// `pause()`: "take barrier if not taken; bump mine_epoch"). Chain
    /// mutations bump the epoch themselves on commit; this is the explicit
    /// primitive the miner's pause controller uses outside of any mutation.
    pub fn bump_mine_epoch(&self) {
        self.inner.lock().mine_epoch += 1;
    }

    pub fn tip_hash(&self) -> Hash256 {
        let inner = self.inner.lock();
        inner.blocks.last().expect("genesis always present").hash()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.inner.lock().blocks.get(height as usize).cloned()
    }

    pub fn height_of(&self, hash: &Hash256) -> Option<u64> {
        self.inner.lock().height_of.get(hash).copied()
    }

    pub fn contains_tx(&self, txid: &Hash256) -> bool {
        self.inner.lock().txs.contains_key(txid)
    }

    pub fn get_tx(&self, txid: &Hash256) -> Option<Transaction> {
        self.inner.lock().txs.get(txid).cloned()
    }

    pub fn mempool_txids(&self) -> Vec<Hash256> {
        self.inner.lock().mempool.iter().copied().collect()
    }

    /// I6: whether `outpoint` is currently spendable on the active chain.
    pub fn is_utxo(&self, outpoint: &OutPoint) -> bool {
        self.inner
            .lock()
            .utxo
            .get(outpoint)
            .copied()
            .unwrap_or(false)
    }

    /// §4.5: idempotent insert into `txs` and `mempool`; creates
    /// `utxo[o] = true` for each new output; notifies observers. No
    /// validity check — an invalid or never-referenced transaction simply
    /// never gets confirmed.
    pub fn add_transaction(&self, tx: Transaction) {
        let mut inner = self.inner.lock();
        let txid = tx.txid();
        if inner.txs.contains_key(&txid) {
            return;
        }
        for index in 0..tx.tx_out.len() {
            inner.utxo.insert(
                OutPoint {
                    hash: txid,
                    index: index as u32,
                },
                true,
            );
        }
        inner.mempool.insert(txid);
        inner.txs.insert(txid, tx.clone());
        debug!(%txid, "transaction added to mempool");
        for observer in &inner.observers {
            observer.observe(&tx);
        }
    }

    /// §4.5 `verify_transaction`: stateless-plus-reference check. Does
    /// *not* consult the UTXO spendable flag — that check belongs to
    /// confirmation (`confirm_transaction`, the connect step of
    /// `add_block`), which is where double-spends are actually rejected.
    pub fn verify_transaction(
        &self,
        tx: &Transaction,
        is_coinbase: bool,
        expected_height: Option<u64>,
    ) -> Result<(), TxError> {
        let inner = self.inner.lock();
        inner.verify_transaction(tx, is_coinbase, expected_height)
    }

    /// §4.5 `add_block`: the consensus primitive. Atomic, with full
    /// rollback on any rejection (P5).
    pub fn add_block(&self, start_height: u64, blocks: Vec<Block>) -> Result<(), BlockError> {
        let mut inner = self.inner.lock();
        let result = inner.add_block(start_height, &blocks);
        match &result {
            Ok(()) => info!(
                start_height,
                added = blocks.len(),
                new_height = inner.blocks.len(),
                "chain extended"
            ),
            Err(e) => warn!(start_height, error = %e, "add_block rejected"),
        }
        result
    }

    /// §4.7 step 1: snapshot-filter the mempool against the current UTXO
    /// set, entirely under the chain mutex, leaving no trace once done.
    /// Returns the height and prev-hash the candidate block should build
    /// on, plus the transactions (in dependency order) to include.
    pub fn candidate_mempool(&self) -> (u64, Hash256, Vec<Transaction>) {
        let mut inner = self.inner.lock();
        inner.candidate_mempool()
    }

    /// §4.6 `add_block` (orphan pool): register a block whose parent is
    /// not on the active chain.
    pub fn add_orphan_block(&self, block: Block) {
        self.inner.lock().orphans.add_block(block);
    }

    pub fn orphan_pool_is_empty(&self) -> bool {
        self.inner.lock().orphans.is_empty()
    }

    pub fn orphan_contains_block(&self, hash: &Hash256) -> bool {
        self.inner.lock().orphans.contains_block(hash)
    }

    /// §4.6 `longest_chain_from`.
    pub fn longest_orphan_chain_from(&self, hash: Hash256) -> Vec<Block> {
        self.inner.lock().orphans.longest_chain_from(hash)
    }

    /// §4.6 `remove_block(hash, delay)`, performed immediately (the
    /// caller is expected to already be on the delayed thread spawned by
    /// [`Self::schedule_orphan_removal`] or to pass `Duration::ZERO`
    /// directly, e.g. once blocks have been incorporated into the chain).
    pub fn remove_orphan_block_now(&self, hash: Hash256) {
        self.inner.lock().orphans.remove_block(hash);
    }

    /// Spawns a detached thread that sleeps for `delay` then clears the
    /// orphan entry for `hash` (§4.6, §5: "time.sleep in orphan TTL... is
    /// a suspension/blocking point").
    pub fn schedule_orphan_removal(chain: Arc<Chain>, hash: Hash256, delay: Duration) {
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            chain.remove_orphan_block_now(hash);
        });
    }
}

impl Inner {
    fn verify_transaction(
        &self,
        tx: &Transaction,
        is_coinbase: bool,
        expected_height: Option<u64>,
    ) -> Result<(), TxError> {
        if is_coinbase {
            return self.verify_coinbase(tx, expected_height.unwrap_or_default());
        }

        let mut input_value: i64 = 0;
        for (index, input) in tx.tx_in.iter().enumerate() {
            let referenced = self.txs.get(&input.prev.hash).ok_or_else(|| {
                TxError::UnknownOutpoint {
                    index,
                    outpoint: input.prev.to_string(),
                }
            })?;
            let output = referenced.tx_out.get(input.prev.index as usize).ok_or(
                TxError::OutputIndexOutOfRange {
                    index,
                    output_index: input.prev.index,
                    max: referenced.tx_out.len(),
                },
            )?;

            let sighash = tx.signature_digest();
            let satisfied = bitebi_core::script::verify_script(
                &input.signature_script,
                &output.pk_script,
                &sighash,
            )
            .map_err(|source| TxError::ScriptFailed { index, source })?;
            if !satisfied {
                return Err(TxError::ScriptNotSatisfied { index });
            }
            input_value += output.value;
        }

        let output_value = tx.total_output_value();
        if input_value < output_value {
            return Err(TxError::Underfunded {
                input_value,
                output_value,
            });
        }
        Ok(())
    }

    fn verify_coinbase(&self, tx: &Transaction, expected_height: u64) -> Result<(), TxError> {
        if tx.tx_in.len() != 1 {
            return Err(TxError::CoinbaseInputCount(tx.tx_in.len()));
        }
        let script = &tx.tx_in[0].signature_script;
        if script.len() != 4 || script[0] != 0x03 {
            return Err(TxError::CoinbaseScriptShape(script.len()));
        }
        let got = u32::from_le_bytes([script[1], script[2], script[3], 0]);
        let expected = (expected_height & 0x00FF_FFFF) as u32;
        if got != expected {
            return Err(TxError::CoinbaseHeightMismatch { got, expected });
        }
        let total = tx.total_output_value();
        if total > bitebi_core::constants::COINBASE_REWARD {
            return Err(TxError::CoinbaseOverpays {
                got: total,
                max: bitebi_core::constants::COINBASE_REWARD,
            });
        }
        Ok(())
    }

    /// The UTXO-spend half of confirmation: mark each non-coinbase input's
    /// outpoint as spent, remove the tx from the mempool, and (whether or
    /// not it's a coinbase) register this transaction's own outputs as
    /// newly spendable. The last part matters because a coinbase — and any
    /// other transaction synced straight inside a block rather than
    /// gossiped first as a standalone `tx` — never passes through
    /// [`Chain::add_transaction`], which is otherwise the only place a
    /// brand-new output would normally get its `utxo[o] = true` entry.
    /// Returns `false` (without partial effect) if any input is not
    /// currently spendable — this is where double-spends are actually
    /// rejected (§4.5).
    fn try_confirm_transaction(&mut self, tx: &Transaction, is_coinbase: bool) -> bool {
        if !is_coinbase {
            let mut flipped = Vec::with_capacity(tx.tx_in.len());
            for input in &tx.tx_in {
                match self.utxo.get(&input.prev) {
                    Some(true) => {
                        self.utxo.insert(input.prev.clone(), false);
                        flipped.push(input.prev.clone());
                    }
                    _ => {
                        for outpoint in flipped {
                            self.utxo.insert(outpoint, true);
                        }
                        return false;
                    }
                }
            }
            self.mempool.remove(&tx.txid());
        }
        let txid = tx.txid();
        for index in 0..tx.tx_out.len() {
            self.utxo.insert(
                OutPoint {
                    hash: txid,
                    index: index as u32,
                },
                true,
            );
        }
        true
    }

    /// Inverse of [`Self::try_confirm_transaction`]'s *spend* half: restores
    /// each input's outpoint to spendable and returns the tx to the
    /// mempool. A non-coinbase transaction's own outputs are left alone —
    /// they were already `utxo[o] = true` before confirmation (via
    /// `add_transaction`, §4.5) and putting the tx back in the mempool
    /// means they are still meant to read as spendable (0-conf, same as any
    /// other mempool transaction's outputs), so there is nothing to
    /// unregister. A coinbase is the one exception: it cannot return to the
    /// mempool (its script is height-specific, §4.7), so once disconnected
    /// its reward output is produced by nothing confirmed or pending and
    /// must be removed. Always succeeds.
    fn cancel_transaction(&mut self, tx: &Transaction, is_coinbase: bool) {
        if is_coinbase {
            let txid = tx.txid();
            for index in 0..tx.tx_out.len() {
                self.utxo.remove(&OutPoint {
                    hash: txid,
                    index: index as u32,
                });
            }
            return;
        }
        for input in &tx.tx_in {
            self.utxo.insert(input.prev.clone(), true);
        }
        self.mempool.insert(tx.txid());
    }

    /// Purge a transaction entirely (mempool filtering found it invalid).
    /// Removes the UTXO entries *it created*; leaves the outpoints it
    /// references untouched (it never owned them).
    fn delete_transaction(&mut self, txid: &Hash256) {
        if let Some(tx) = self.txs.remove(txid) {
            for index in 0..tx.tx_out.len() {
                self.utxo.remove(&OutPoint {
                    hash: *txid,
                    index: index as u32,
                });
            }
        }
        self.mempool.remove(txid);
    }

    /// §4.5 `sorted_mempool`: a topological order over the dependency DAG
    /// induced by mempool transactions that spend each other's outputs.
    fn sorted_mempool(&self) -> Vec<Hash256> {
        let mut indegree: HashMap<Hash256, usize> =
            self.mempool.iter().map(|id| (*id, 0)).collect();
        let mut dependents: HashMap<Hash256, Vec<Hash256>> = HashMap::new();

        for txid in &self.mempool {
            let tx = &self.txs[txid];
            for input in &tx.tx_in {
                if self.mempool.contains(&input.prev.hash) {
                    dependents.entry(input.prev.hash).or_default().push(*txid);
                    *indegree.get_mut(txid).expect("txid is in mempool") += 1;
                }
            }
        }

        let mut ready: Vec<Hash256> = indegree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort();
        let mut queue = std::collections::VecDeque::from(ready);

        let mut order = Vec::with_capacity(self.mempool.len());
        while let Some(txid) = queue.pop_front() {
            order.push(txid);
            if let Some(deps) = dependents.get(&txid) {
                let mut newly_ready = Vec::new();
                for dep in deps {
                    let degree = indegree.get_mut(dep).expect("recorded indegree");
                    *degree -= 1;
                    if *degree == 0 {
                        newly_ready.push(*dep);
                    }
                }
                newly_ready.sort();
                queue.extend(newly_ready);
            }
        }

        if order.len() != self.mempool.len() {
            fatal("cycle detected in mempool dependency graph (I5 violated)");
        }
        order
    }

    fn candidate_mempool(&mut self) -> (u64, Hash256, Vec<Transaction>) {
        let order = self.sorted_mempool();
        let mut included = Vec::new();

        for txid in order {
            let Some(tx) = self.txs.get(&txid).cloned() else {
                continue;
            };
            let verified = self.verify_transaction(&tx, false, None).is_ok();
            let confirmed = verified && self.try_confirm_transaction(&tx, false);
            if confirmed {
                included.push(tx);
            } else {
                self.delete_transaction(&txid);
            }
        }

        // Roll back every speculative confirmation: candidate assembly is
        // a read filtered through the verification pipeline, not a
        // mutation. `cancel_transaction` is now an exact inverse of the
        // non-coinbase half of `try_confirm_transaction` (it leaves a
        // mempool tx's own outputs alone, since those were already
        // `utxo[o] = true` before this loop ran), so undoing the included
        // txs in reverse order restores `utxo`/`mempool` exactly.
        for tx in included.iter().rev() {
            self.cancel_transaction(tx, false);
        }

        let height = self.blocks.len() as u64;
        let prev_hash = self.blocks.last().expect("genesis always present").hash();
        (height, prev_hash, included)
    }

    /// §4.5 `add_block` algorithm, steps 1-7.
    fn add_block(&mut self, start_height: u64, blocks: &[Block]) -> Result<(), BlockError> {
        // Step 1: cache every transaction regardless of outcome. This is
        // the one documented asymmetry in P5's "bit-identical on failure"
        // claim — the cache is not part of any of I1-I8 and is explicitly
        // kept even when the block set is rejected (§4.5 step 1).
        for block in blocks {
            for tx in &block.txs {
                self.txs.entry(tx.txid()).or_insert_with(|| tx.clone());
            }
        }

        // Step 2: only ever switch to a strictly longer chain. Genesis
        // (height 0) is fixed and can never be the start of a reorg.
        let chain_len = self.blocks.len() as u64;
        if start_height == 0
            || start_height > chain_len
            || start_height + blocks.len() as u64 <= chain_len
        {
            return Err(BlockError::NotExtending(chain_len));
        }

        // Step 3: header-chain linkage.
        let tip_hash = self.blocks[start_height as usize - 1].hash();
        if blocks[0].header.prev_hash != tip_hash {
            return Err(BlockError::LinkageToTipMismatch);
        }
        for i in 1..blocks.len() {
            if blocks[i].header.prev_hash != blocks[i - 1].hash() {
                return Err(BlockError::InternalLinkageMismatch(i));
            }
        }

        // Step 4: verify each block against the pre-reorg UTXO set (§9).
        for (i, block) in blocks.iter().enumerate() {
            let height = start_height + i as u64;
            if block.txs.is_empty() {
                return Err(BlockError::EmptyBlock(i));
            }
            if !satisfies_target(&block.hash(), block.header.n_bits) {
                return Err(BlockError::InvalidPow(i));
            }
            if block.header.merkle_root != block.computed_merkle_root() {
                return Err(BlockError::InvalidMerkleRoot(i));
            }
            self.verify_transaction(&block.txs[0], true, Some(height))
                .map_err(|e| BlockError::TxRejected(i, 0, e))?;
            for (j, tx) in block.txs.iter().enumerate().skip(1) {
                self.verify_transaction(tx, false, None)
                    .map_err(|e| BlockError::TxRejected(i, j, e))?;
            }
        }

        // Steps 5-6 mutate `utxo`/`mempool` before we know the new suffix
        // will actually connect. Per §9's redesign guidance ("mutate a
        // staging copy... and commit on success"), snapshot both before
        // touching either, so a connect failure is undone by a plain
        // restore rather than by replaying inverse operations that could
        // themselves (in principle) fail midway — P5 this way holds by
        // construction rather than by a best-effort undo.
        let utxo_snapshot = self.utxo.clone();
        let mempool_snapshot = self.mempool.clone();

        // Step 5: disconnect the soon-to-be-orphaned suffix.
        let disconnected: Vec<Block> = self.blocks[start_height as usize..].to_vec();
        for block in disconnected.iter().rev() {
            for tx in block.txs.iter().rev() {
                self.cancel_transaction(tx, tx.is_coinbase());
            }
        }

        // Step 6: connect the new suffix, aborting on the first failure (a
        // double-spend among the new blocks themselves).
        let mut failure: Option<(usize, usize)> = None;
        'connect: for (i, block) in blocks.iter().enumerate() {
            for (j, tx) in block.txs.iter().enumerate() {
                if !self.try_confirm_transaction(tx, tx.is_coinbase()) {
                    failure = Some((i, j));
                    break 'connect;
                }
            }
        }

        if let Some((i, j)) = failure {
            self.utxo = utxo_snapshot;
            self.mempool = mempool_snapshot;
            return Err(BlockError::DoubleSpendOnConnect(i, j));
        }

        // Step 7: commit.
        for block in &disconnected {
            self.height_of.remove(&block.hash());
        }
        self.blocks.truncate(start_height as usize);
        for (i, block) in blocks.iter().enumerate() {
            let height = start_height + i as u64;
            self.height_of.insert(block.hash(), height);
            self.blocks.push(block.clone());
        }
        self.mine_epoch += 1;

        // Notify observers of every transaction newly confirmed by this
        // extension, including coinbases, which (unlike ordinary
        // transactions) never pass through `add_transaction` first — this
        // is the only point at which a wallet ever learns of a mining
        // reward paid to one of its own identities (§4.9).
        for block in blocks {
            for tx in &block.txs {
                for observer in &self.observers {
                    observer.observe(tx);
                }
            }
        }

        Ok(())
    }
}

/// Fatal invariant violation (§7): log and abort the process. These paths
/// indicate a bug, not a recoverable protocol-level rejection.
fn fatal(msg: &str) -> ! {
    error!("{msg}");
    std::process::abort();
}
