//! The orphan pool (§4.6): a DAG of blocks whose parent is not (yet) on
//! the active chain.
//!
//! This module holds only the pure data structure and its traversal
//! logic; every entry point is reached through [`crate::state::Chain`],
//! which serializes orphan mutations with chain mutations under its
//! single mutex, per §4.6's closing line.

use std::collections::{HashMap, HashSet};

use bitebi_core::{Block, Hash256};

/// A node in the orphan DAG. A node with `block: None` is a placeholder
/// standing in for an unknown parent — it exists only because at least
/// one known orphan names it as `prev_hash`.
#[derive(Default)]
pub(crate) struct OrphanNode {
    pub(crate) block: Option<Block>,
    pub(crate) successors: HashSet<Hash256>,
}

#[derive(Default)]
pub(crate) struct OrphanPool {
    pub(crate) nodes: HashMap<Hash256, OrphanNode>,
}

impl OrphanPool {
    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn contains_block(&self, hash: &Hash256) -> bool {
        self.nodes.get(hash).is_some_and(|n| n.block.is_some())
    }

    /// Register `block` in the pool, creating its node (or filling in a
    /// placeholder) and registering it as a successor of its parent.
    /// Idempotent.
    pub(crate) fn add_block(&mut self, block: Block) {
        let hash = block.hash();
        let parent_hash = block.header.prev_hash;

        let node = self.nodes.entry(hash).or_default();
        node.block = Some(block);

        let parent = self.nodes.entry(parent_hash).or_default();
        parent.successors.insert(hash);
    }

    /// §4.6: clear the node's block; if it then has no block and no
    /// successors, delete it and detach it from its parent (garbage
    /// collecting the parent in turn if it too becomes empty).
    pub(crate) fn remove_block(&mut self, hash: Hash256) {
        let Some(node) = self.nodes.get_mut(&hash) else {
            return;
        };
        let parent_hash = node.block.as_ref().map(|b| b.header.prev_hash);
        node.block = None;

        if self.node_is_dead(&hash) {
            self.nodes.remove(&hash);
            if let Some(parent_hash) = parent_hash {
                self.detach_successor(parent_hash, hash);
            }
        }
    }

    fn node_is_dead(&self, hash: &Hash256) -> bool {
        self.nodes
            .get(hash)
            .is_some_and(|n| n.block.is_none() && n.successors.is_empty())
    }

    /// Remove `child` from `parent`'s successor set. If `parent` was only a
    /// placeholder (no block of its own) and is now empty, delete it too —
    /// placeholders record no `prev_hash`, so there is nothing further up
    /// the chain to chase.
    fn detach_successor(&mut self, parent: Hash256, child: Hash256) {
        let Some(node) = self.nodes.get_mut(&parent) else {
            return;
        };
        node.successors.remove(&child);

        if self.node_is_dead(&parent) {
            self.nodes.remove(&parent);
        }
    }

    /// The longest path of real blocks passing through `hash`: any
    /// real-block ancestors of `hash` that are themselves still orphans,
    /// followed by `hash` itself (if known), followed by the longest
    /// chain of real-block descendants (§4.6). Used by the peer layer
    /// right after a new block is added, to find the full candidate
    /// extension to hand to `add_block`.
    pub(crate) fn longest_chain_from(&self, hash: Hash256) -> Vec<Block> {
        let mut chain = self.real_ancestors(hash);
        let Some(node) = self.nodes.get(&hash) else {
            return chain;
        };
        if let Some(block) = &node.block {
            chain.push(block.clone());
        }
        let best_successor_chain = node
            .successors
            .iter()
            .map(|s| self.longest_descendant_chain(*s))
            .max_by_key(|c| c.len())
            .unwrap_or_default();
        chain.extend(best_successor_chain);
        chain
    }

    /// Walk upward from `hash`'s own parent, collecting real blocks as
    /// long as each ancestor is itself present in the pool with a known
    /// body. Stops at the first ancestor that is unknown or still a bare
    /// placeholder — that ancestor's hash is presumably the active
    /// chain's tip, or chain sync is still needed to find it.
    fn real_ancestors(&self, hash: Hash256) -> Vec<Block> {
        let mut ancestors = Vec::new();
        let Some(mut parent_hash) = self
            .nodes
            .get(&hash)
            .and_then(|n| n.block.as_ref())
            .map(|b| b.header.prev_hash)
        else {
            return ancestors;
        };
        while let Some(block) = self.nodes.get(&parent_hash).and_then(|n| n.block.clone()) {
            parent_hash = block.header.prev_hash;
            ancestors.push(block);
        }
        ancestors.reverse();
        ancestors
    }

    /// The longest path of real blocks starting at `hash` and descending
    /// through successors only (no ancestor walk — used as the recursive
    /// step of [`Self::longest_chain_from`]).
    fn longest_descendant_chain(&self, hash: Hash256) -> Vec<Block> {
        let Some(node) = self.nodes.get(&hash) else {
            return Vec::new();
        };
        let best = node
            .successors
            .iter()
            .map(|s| self.longest_descendant_chain(*s))
            .max_by_key(|c| c.len())
            .unwrap_or_default();
        match &node.block {
            Some(block) => {
                let mut chain = vec![block.clone()];
                chain.extend(best);
                chain
            }
            None => best,
        }
    }
}

#[cfg(test)]
mod tests {
    use bitebi_core::BlockHeader;

    use super::*;

    fn block(prev: Hash256, nonce: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 0,
                prev_hash: prev,
                merkle_root: Hash256::ZERO,
                time: 0,
                n_bits: 0x2000_FFFF,
                nonce,
            },
            txs: Vec::new(),
        }
    }

    #[test]
    fn add_then_remove_clears_a_leaf_node() {
        let mut pool = OrphanPool::default();
        let b = block(Hash256::ZERO, 1);
        let hash = b.hash();
        pool.add_block(b);
        assert!(pool.contains_block(&hash));

        pool.remove_block(hash);
        assert!(!pool.contains_block(&hash));
        assert!(pool.is_empty());
    }

    #[test]
    fn longest_chain_from_picks_the_deeper_branch() {
        let mut pool = OrphanPool::default();
        let b1 = block(Hash256::ZERO, 1);
        let b1_hash = b1.hash();
        let b2 = block(b1_hash, 2);
        let b2_hash = b2.hash();
        let b3 = block(b2_hash, 3);
        let b_short = block(b1_hash, 99);

        pool.add_block(b1.clone());
        pool.add_block(b2.clone());
        pool.add_block(b3.clone());
        pool.add_block(b_short.clone());

        let chain = pool.longest_chain_from(b1_hash);
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].hash(), b1_hash);
        assert_eq!(chain[1].hash(), b2_hash);
        assert_eq!(chain[2].hash(), b3.hash());
    }

    #[test]
    fn longest_chain_from_prepends_known_orphan_ancestors() {
        let mut pool = OrphanPool::default();
        let b1 = block(Hash256::ZERO, 1); // parent (genesis) not itself an orphan
        let b1_hash = b1.hash();
        let b2 = block(b1_hash, 2);
        let b2_hash = b2.hash();

        pool.add_block(b1.clone());
        pool.add_block(b2.clone());

        // Looking up from b2 should recover b1 as a prefix.
        let chain = pool.longest_chain_from(b2_hash);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].hash(), b1_hash);
        assert_eq!(chain[1].hash(), b2_hash);
    }

    #[test]
    fn placeholder_parent_is_garbage_collected_once_all_successors_expire() {
        let mut pool = OrphanPool::default();
        let b2 = block(Hash256([1u8; 32]), 2); // parent (all-1s hash) unknown: placeholder node created
        let b2_hash = b2.hash();
        pool.add_block(b2);
        assert!(pool.nodes.contains_key(&Hash256([1u8; 32])));

        pool.remove_block(b2_hash);
        assert!(!pool.nodes.contains_key(&b2_hash));
        assert!(!pool.nodes.contains_key(&Hash256([1u8; 32])));
    }
}
