//! Block synchronization (§4.8 "Block sync"): a sparse, tip-descending
//! locator so the responder can find the fork point in O(log n) hashes,
//! and the `getblocks` responder logic that walks it.

use bitebi_chain::Chain;
use bitebi_core::constants::MAX_INV_ENTRIES;
use bitebi_core::Hash256;

use crate::message::InvItem;

/// Build a locator: the tip, then hashes at exponentially growing offsets
/// behind it (1, 2, 4, 8, ...), down to and including genesis (§4.8).
pub fn build_locator(chain: &Chain) -> Vec<Hash256> {
    let tip = chain.len() - 1;
    let mut hashes = Vec::new();
    let mut offset: u64 = 0;
    let mut step: u64 = 1;
    loop {
        let height = tip.saturating_sub(offset);
        if let Some(block) = chain.block_at(height) {
            hashes.push(block.hash());
        }
        if height == 0 {
            break;
        }
        offset += step;
        step *= 2;
    }
    hashes
}

/// §4.8 `getblocks` handler: find the highest locator hash present on the
/// active chain (the "common height"), then list up to
/// [`MAX_INV_ENTRIES`] `MSG_BLOCK` items for heights above it, stopping
/// before `stop_hash` if encountered.
pub fn answer_getblocks(chain: &Chain, locator: &[Hash256], stop_hash: Hash256) -> Vec<InvItem> {
    let common_height = locator
        .iter()
        .find_map(|hash| chain.height_of(hash))
        .unwrap_or(0);

    let mut items = Vec::new();
    let mut height = common_height + 1;
    while height < chain.len() && items.len() < MAX_INV_ENTRIES {
        let Some(block) = chain.block_at(height) else {
            break;
        };
        let hash = block.hash();
        if hash == stop_hash {
            break;
        }
        items.push(InvItem::block(hash));
        height += 1;
    }
    items
}
