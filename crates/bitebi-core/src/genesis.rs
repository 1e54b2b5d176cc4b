//! The fixed genesis block (§6): identical on every node, never gossiped.

use crate::merkle::merkle_root;
use crate::types::{Block, BlockHeader, Hash256, Transaction};

/// `nBits` for the genesis header: exp=3, mantissa=0x001000, the loosest
/// target any preset's `max_n_bits` accepts (§6).
pub const GENESIS_N_BITS: u32 = 0x0300_1000;

/// The single empty transaction the genesis block carries in place of a
/// coinbase. It has no inputs and no outputs, so it mints nothing and is
/// never a valid spend target.
fn genesis_transaction() -> Transaction {
    Transaction {
        version: 0,
        tx_in: Vec::new(),
        tx_out: Vec::new(),
        lock_time: 0,
    }
}

/// The genesis block every bitebi chain begins from: `version = 0`,
/// all-zero `prev_hash`, `time = 0`, `nonce = 0`, carrying the lone empty
/// transaction above (§6). Its hash is a pure function of these constants,
/// so all nodes agree on it without exchanging it over the wire.
pub fn genesis_block() -> Block {
    let tx = genesis_transaction();
    let header = BlockHeader {
        version: 0,
        prev_hash: Hash256::ZERO,
        merkle_root: merkle_root(&[tx.txid()]),
        time: 0,
        n_bits: GENESIS_N_BITS,
        nonce: 0,
    };
    Block {
        header,
        txs: vec![tx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_block_is_internally_consistent() {
        let block = genesis_block();
        assert_eq!(block.header.prev_hash, Hash256::ZERO);
        assert_eq!(block.header.merkle_root, block.computed_merkle_root());
        assert_eq!(block.txs.len(), 1);
        assert!(block.txs[0].tx_in.is_empty());
        assert!(block.txs[0].tx_out.is_empty());
    }

    #[test]
    fn genesis_block_is_deterministic() {
        assert_eq!(genesis_block().hash(), genesis_block().hash());
    }

    #[test]
    fn genesis_hash_does_not_need_to_satisfy_its_own_nbits() {
        // I3 only binds blocks at height >= 1; genesis is exempt, so its
        // nBits (exp = 3, an extremely tight target) need not be met by
        // hash(genesis.header) and ordinarily isn't.
        use crate::hash::satisfies_target;
        let block = genesis_block();
        let hash = block.hash();
        let _ = satisfies_target(&hash, block.header.n_bits);
    }
}
