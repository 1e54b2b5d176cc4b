//! Candidate assembly and the nonce-search loop (§4.7).
//!
//! Grounded on the teacher's `rill-consensus::engine::mine_block` nonce
//! search and `ConsensusEngine::create_block_template`, adapted to this
//! protocol's coinbase shape and to `Chain::candidate_mempool`, which
//! already performs the speculative-confirm-then-roll-back mempool filter
//! under the chain mutex (§4.7 step 1, second half).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bitebi_chain::{BlockBroadcaster, Chain};
use bitebi_core::constants::COINBASE_REWARD;
use bitebi_core::hash::satisfies_target;
use bitebi_core::merkle::merkle_root;
use bitebi_core::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxIn, TxOut};
use tracing::{debug, info};

use crate::MinerControl;

/// Fixed per-miner parameters: the header fields every candidate reuses,
/// and the reward destination (§4.7: "takes `version`, `nBits`, `pk_script`
/// for the reward output").
#[derive(Clone)]
pub struct MinerConfig {
    pub version: i32,
    pub n_bits: u32,
    pub pk_script: Vec<u8>,
}

/// Assemble the coinbase transaction for `height`: one input whose
/// `signature_script` is `0x03` followed by the height as three
/// little-endian bytes (§3, §4.7), one output paying the fixed subsidy.
fn coinbase_for(height: u64, pk_script: &[u8]) -> Transaction {
    let h = (height & 0x00FF_FFFF) as u32;
    let le = h.to_le_bytes();
    Transaction {
        version: 1,
        tx_in: vec![TxIn {
            prev: OutPoint {
                hash: Hash256::ZERO,
                index: OutPoint::COINBASE_INDEX,
            },
            signature_script: vec![0x03, le[0], le[1], le[2]],
            sequence: 0xFFFF_FFFF,
        }],
        tx_out: vec![TxOut {
            value: COINBASE_REWARD,
            pk_script: pk_script.to_vec(),
        }],
        lock_time: 0,
    }
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// §4.7 step 1: build a fresh candidate from the chain's current mempool.
/// Everything height/prev-hash/mempool-filtering related goes through
/// [`Chain::candidate_mempool`]; this function only adds the coinbase and
/// computes the Merkle root and wall-clock timestamp.
fn build_candidate(chain: &Chain, cfg: &MinerConfig) -> Block {
    let (height, prev_hash, mempool_txs) = chain.candidate_mempool();
    let mut txs = Vec::with_capacity(1 + mempool_txs.len());
    txs.push(coinbase_for(height, &cfg.pk_script));
    txs.extend(mempool_txs);

    let leaves: Vec<Hash256> = txs.iter().map(Transaction::txid).collect();
    let header = BlockHeader {
        version: cfg.version,
        prev_hash,
        merkle_root: merkle_root(&leaves),
        time: now_secs(),
        n_bits: cfg.n_bits,
        nonce: 0,
    };
    Block { header, txs }
}

/// The miner's main loop (§4.7). Intended to be spawned on its own
/// `std::thread`; returns once `stop` is observed set.
pub fn run(
    chain: Arc<Chain>,
    broadcaster: Arc<dyn BlockBroadcaster>,
    control: Arc<MinerControl>,
    cfg: MinerConfig,
    stop: Arc<AtomicBool>,
) {
    let mut local_epoch: Option<u64> = None;
    let mut candidate: Option<Block> = None;

    while !stop.load(Ordering::Relaxed) {
        let chain_epoch = chain.mine_epoch();
        if local_epoch != Some(chain_epoch) {
            // §4.7 step 1: "If local epoch < mine_epoch, acquire the pause
            // barrier, release it immediately" — i.e. block here if paused,
            // then rebuild against the now-current chain state.
            control.gate().wait_while_paused();
            local_epoch = Some(chain_epoch);
            candidate = Some(build_candidate(&chain, &cfg));
        }

        let block = candidate.as_mut().expect("built on every epoch change");

        if satisfies_target(&block.hash(), block.header.n_bits) {
            let height = chain.len();
            match chain.add_block(height, vec![block.clone()]) {
                Ok(()) => {
                    info!(height, hash = %block.hash(), "mined a block");
                    broadcaster.broadcast_block(block);
                }
                Err(e) => debug!(error = %e, "mined block rejected on submission"),
            }
            // Either way, the next loop iteration observes a fresh
            // mine_epoch (our own success bumps it; a loss means someone
            // else's block got there first and also bumped it) and
            // rebuilds — §4.7 step 2: "Either way continue."
        }

        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
}
